//! Typed view over the merged YAML configuration.
//!
//! Every field has a default so an empty `config.yml` yields a working demo.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: AppSettings,
    pub server: ServerSettings,
    pub qianfan: QianfanSettings,
    pub retrieval: RetrievalSettings,
    pub chat: ChatSettings,
}

impl Settings {
    pub fn from_value(value: &Value) -> Result<Self, ApiError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ApiError::BadRequest(format!("Invalid config: {}", e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub title: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            title: "溜溜梅宇宙 动手学大模型应用开发".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QianfanSettings {
    pub api_base: String,
    pub chat_endpoint: String,
    pub embedding_endpoint: String,
    pub request_timeout_secs: u64,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    /// Fallback credentials, normally kept in `secrets.yaml`.
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
}

impl Default for QianfanSettings {
    fn default() -> Self {
        Self {
            api_base: "https://aip.baidubce.com".to_string(),
            chat_endpoint: "ernie-lite-8k".to_string(),
            embedding_endpoint: "embedding-v1".to_string(),
            request_timeout_secs: 60,
            temperature: None,
            top_p: None,
            api_key: None,
            secret_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub persist_directory: String,
    pub top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            persist_directory: "data_base/vector_db".to_string(),
            top_k: 4,
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Transcript entries fed to the history-aware mode; 0 means all.
    pub history_limit: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self { history_limit: 40 }
    }
}
