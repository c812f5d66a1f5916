//! Qianfan AK/SK handling.
//!
//! Credentials entered in the UI are process-wide, like exported environment
//! variables: every session sees them. The process environment and the
//! secrets file are consulted when the UI has not provided any.

use std::env;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::core::config::settings::QianfanSettings;
use crate::core::errors::ApiError;

pub const AK_ENV: &str = "QIANFAN_AK";
pub const SK_ENV: &str = "QIANFAN_SK";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
}

impl Credentials {
    /// Both halves must be non-blank; anything else counts as "not set".
    pub fn new(api_key: &str, secret_key: &str) -> Option<Self> {
        let api_key = api_key.trim();
        let secret_key = secret_key.trim();
        if api_key.is_empty() || secret_key.is_empty() {
            return None;
        }
        Some(Self {
            api_key: api_key.to_string(),
            secret_key: secret_key.to_string(),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &mask(&self.api_key))
            .field("secret_key", &"****")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    Ui,
    Environment,
    Config,
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub configured: bool,
    pub source: CredentialSource,
    /// Masked AK so users can tell which key is active.
    pub api_key_hint: Option<String>,
}

#[derive(Clone, Default)]
pub struct CredentialStore {
    ui: Arc<RwLock<Option<Credentials>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores UI-entered credentials; blank values clear them.
    pub fn set(&self, api_key: &str, secret_key: &str) -> bool {
        let credentials = Credentials::new(api_key, secret_key);
        let configured = credentials.is_some();
        if let Ok(mut guard) = self.ui.write() {
            *guard = credentials;
        }
        configured
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.ui.write() {
            *guard = None;
        }
    }

    pub fn resolve(&self, settings: &QianfanSettings) -> Result<Credentials, ApiError> {
        self.resolve_with(settings, |key| env::var(key).ok())
            .map(|(credentials, _)| credentials)
            .ok_or_else(missing_credentials)
    }

    pub fn status(&self, settings: &QianfanSettings) -> CredentialStatus {
        match self.resolve_with(settings, |key| env::var(key).ok()) {
            Some((credentials, source)) => CredentialStatus {
                configured: true,
                source,
                api_key_hint: Some(mask(&credentials.api_key)),
            },
            None => CredentialStatus {
                configured: false,
                source: CredentialSource::None,
                api_key_hint: None,
            },
        }
    }

    fn resolve_with<F>(
        &self,
        settings: &QianfanSettings,
        lookup_env: F,
    ) -> Option<(Credentials, CredentialSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(credentials) = self.ui.read().ok().and_then(|guard| guard.clone()) {
            return Some((credentials, CredentialSource::Ui));
        }

        if let (Some(ak), Some(sk)) = (lookup_env(AK_ENV), lookup_env(SK_ENV)) {
            if let Some(credentials) = Credentials::new(&ak, &sk) {
                return Some((credentials, CredentialSource::Environment));
            }
        }

        let (Some(ak), Some(sk)) = (settings.api_key.as_deref(), settings.secret_key.as_deref())
        else {
            return None;
        };
        Credentials::new(ak, sk).map(|credentials| (credentials, CredentialSource::Config))
    }
}

fn missing_credentials() -> ApiError {
    ApiError::MissingCredentials(format!(
        "Qianfan AK/SK are not configured; enter them in the sidebar or set {} and {}",
        AK_ENV, SK_ENV
    ))
}

fn mask(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    format!("{}****", visible)
}
