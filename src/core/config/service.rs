use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::paths::AppPaths;
use super::settings::Settings;
use super::validation::validate_config;
use crate::core::errors::ApiError;

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 10] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "token_",
    "credential",
    "access_key",
    "client_id",
    "access_token",
    "bearer",
];

const SENSITIVE_WHITELIST: [&str; 3] = ["max_tokens", "max_output_tokens", "tokens"];

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("QIANFAN_CHAT_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    pub fn config_write_path(&self) -> PathBuf {
        if let Ok(path) = env::var("QIANFAN_CHAT_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        self.paths.user_data_dir.join("config.yml")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    pub fn load_config(&self) -> Result<Value, ApiError> {
        let public_config = load_yaml_file(&self.config_path());
        let secrets_config = load_yaml_file(&self.secrets_path());
        let merged = deep_merge(&public_config, &secrets_config);
        Ok(merged)
    }

    /// Typed view of the merged configuration with defaults filled in.
    pub fn load_settings(&self) -> Result<Settings, ApiError> {
        let config = self.load_config()?;
        Settings::from_value(&config)
    }

    pub fn update_config(&self, config_data: Value, merge: bool) -> Result<(), ApiError> {
        let current = self.load_config()?;
        let restored = restore_redacted_values(&config_data, &current);
        let to_save = if merge {
            deep_merge(&current, &restored)
        } else {
            restored
        };

        validate_config(&to_save)?;
        save_config_files(self, &to_save)?;
        tracing::info!("Configuration updated (merge: {})", merge);
        Ok(())
    }

    pub fn redact_sensitive_values(&self, value: &Value) -> Value {
        redact_sensitive_values(value)
    }
}

fn load_yaml_file(path: &Path) -> Value {
    if !path.exists() {
        return Value::Object(Map::new());
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Value>(&contents) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => Value::Object(Map::new()),
            Err(err) => {
                tracing::warn!("Ignoring unparsable config {}: {}", path.display(), err);
                Value::Object(Map::new())
            }
        },
        Err(_) => Value::Object(Map::new()),
    }
}

fn save_config_files(service: &ConfigService, config: &Value) -> Result<(), ApiError> {
    let (public_config, secrets_config) = split_config(config);

    let config_path = service.config_write_path();
    if let Some(parent) = config_path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let public_yaml = serde_yaml::to_string(&public_config).map_err(ApiError::internal)?;
    fs::write(&config_path, public_yaml).map_err(ApiError::internal)?;

    let secrets_path = service.secrets_path();
    if let Some(parent) = secrets_path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let secrets_yaml = serde_yaml::to_string(&secrets_config).map_err(ApiError::internal)?;
    fs::write(&secrets_path, secrets_yaml).map_err(ApiError::internal)?;

    Ok(())
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn split_config(config: &Value) -> (Value, Value) {
    match config {
        Value::Object(map) => {
            let mut public_map = Map::new();
            let mut secret_map = Map::new();

            for (key, value) in map {
                match value {
                    Value::Object(_) => {
                        let (public_sub, secret_sub) = split_config(value);
                        if !is_empty_object(&public_sub) {
                            public_map.insert(key.clone(), public_sub);
                        }
                        if !is_empty_object(&secret_sub) {
                            secret_map.insert(key.clone(), secret_sub);
                        }
                    }
                    _ => {
                        if is_sensitive_key(key) && !value.is_null() {
                            secret_map.insert(key.clone(), value.clone());
                        } else {
                            public_map.insert(key.clone(), value.clone());
                        }
                    }
                }
            }

            (Value::Object(public_map), Value::Object(secret_map))
        }
        _ => (config.clone(), Value::Object(Map::new())),
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn restore_redacted_values(new_value: &Value, original: &Value) -> Value {
    match new_value {
        Value::Object(map) => {
            let mut restored = Map::new();
            let original_map = original.as_object();

            for (key, value) in map {
                let orig_val = original_map.and_then(|m| m.get(key));
                if value.as_str() == Some(REDACT_PLACEHOLDER) {
                    if let Some(orig) = orig_val {
                        restored.insert(key.clone(), orig.clone());
                    }
                    continue;
                }

                if value.is_object() {
                    let merged = restore_redacted_values(value, orig_val.unwrap_or(&Value::Null));
                    restored.insert(key.clone(), merged);
                } else {
                    restored.insert(key.clone(), value.clone());
                }
            }

            Value::Object(restored)
        }
        _ => new_value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    if SENSITIVE_WHITELIST
        .iter()
        .any(|allowed| *allowed == key_lower)
    {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}

fn is_empty_object(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service_in(dir: &Path) -> ConfigService {
        ConfigService::new(Arc::new(AppPaths::from_dirs(
            dir.to_path_buf(),
            dir.to_path_buf(),
        )))
    }

    #[test]
    fn deep_merge_merges_objects_and_overrides_scalars() {
        let base = json!({
            "qianfan": { "chat_endpoint": "ernie-lite-8k", "request_timeout_secs": 60 },
            "retrieval": { "top_k": 4 }
        });
        let override_value = json!({
            "qianfan": { "chat_endpoint": "completions_pro" },
            "retrieval": { "top_k": 6 },
            "chat": { "history_limit": 10 }
        });

        let merged = deep_merge(&base, &override_value);

        assert_eq!(
            merged,
            json!({
                "qianfan": { "chat_endpoint": "completions_pro", "request_timeout_secs": 60 },
                "retrieval": { "top_k": 6 },
                "chat": { "history_limit": 10 }
            })
        );
    }

    #[test]
    fn split_config_moves_qianfan_keys_to_secrets() {
        let input = json!({
            "qianfan": {
                "api_key": "ak",
                "secret_key": "sk",
                "api_base": "https://aip.baidubce.com"
            },
            "retrieval": { "top_k": 4 }
        });

        let (public_config, secret_config) = split_config(&input);

        assert_eq!(
            public_config,
            json!({
                "qianfan": { "api_base": "https://aip.baidubce.com" },
                "retrieval": { "top_k": 4 }
            })
        );
        assert_eq!(
            secret_config,
            json!({ "qianfan": { "api_key": "ak", "secret_key": "sk" } })
        );
    }

    #[test]
    fn redact_and_restore_keep_secrets_out_of_the_ui() {
        let original = json!({
            "qianfan": { "api_key": "ak", "secret_key": "sk", "chat_endpoint": "eb-instant" }
        });

        let redacted = redact_sensitive_values(&original);
        assert_eq!(
            redacted,
            json!({
                "qianfan": { "api_key": "****", "secret_key": "****", "chat_endpoint": "eb-instant" }
            })
        );

        let mut edited = redacted.clone();
        edited["qianfan"]["chat_endpoint"] = json!("ernie-lite-8k");
        let restored = restore_redacted_values(&edited, &original);
        assert_eq!(
            restored,
            json!({
                "qianfan": { "api_key": "ak", "secret_key": "sk", "chat_endpoint": "ernie-lite-8k" }
            })
        );
    }

    #[test]
    fn update_config_writes_public_and_secret_files_separately() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service_in(tmp.path());

        service
            .update_config(
                json!({ "qianfan": { "api_key": "ak", "chat_endpoint": "eb-instant" } }),
                true,
            )
            .unwrap();

        let public = fs::read_to_string(tmp.path().join("config.yml")).unwrap();
        let secrets = fs::read_to_string(tmp.path().join("secrets.yaml")).unwrap();
        assert!(public.contains("eb-instant"));
        assert!(!public.contains("ak\n"));
        assert!(secrets.contains("api_key"));

        let loaded = service.load_config().unwrap();
        assert_eq!(loaded["qianfan"]["api_key"], json!("ak"));
        assert_eq!(loaded["qianfan"]["chat_endpoint"], json!("eb-instant"));
    }

    #[test]
    fn update_config_rejects_invalid_values() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service_in(tmp.path());

        let result = service.update_config(json!({ "retrieval": { "top_k": 0 } }), true);
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
        assert!(!tmp.path().join("config.yml").exists());
    }
}
