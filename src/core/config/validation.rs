use serde_json::{Map, Value};

use crate::core::errors::ApiError;

pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(app) = expect_optional_object(root, "app")? {
        validate_optional_string_field(app, "app.title", "title")?;
    }

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 0, 65535)?;
        validate_string_array_field(
            server,
            "server.cors_allowed_origins",
            "cors_allowed_origins",
        )?;
    }

    if let Some(qianfan) = expect_optional_object(root, "qianfan")? {
        validate_non_empty_string_field(qianfan, "qianfan.api_base", "api_base")?;
        validate_non_empty_string_field(qianfan, "qianfan.chat_endpoint", "chat_endpoint")?;
        validate_non_empty_string_field(
            qianfan,
            "qianfan.embedding_endpoint",
            "embedding_endpoint",
        )?;
        validate_u64_field(
            qianfan,
            "qianfan.request_timeout_secs",
            "request_timeout_secs",
            1,
            3_600,
        )?;
        validate_f64_field(qianfan, "qianfan.temperature", "temperature", 0.0, 1.0)?;
        validate_f64_field(qianfan, "qianfan.top_p", "top_p", 0.0, 1.0)?;
        validate_optional_string_field(qianfan, "qianfan.api_key", "api_key")?;
        validate_optional_string_field(qianfan, "qianfan.secret_key", "secret_key")?;
    }

    if let Some(retrieval) = expect_optional_object(root, "retrieval")? {
        validate_non_empty_string_field(
            retrieval,
            "retrieval.persist_directory",
            "persist_directory",
        )?;
        validate_u64_field(retrieval, "retrieval.top_k", "top_k", 1, 100)?;
        validate_u64_field(retrieval, "retrieval.chunk_size", "chunk_size", 1, 100_000)?;
        validate_u64_field(
            retrieval,
            "retrieval.chunk_overlap",
            "chunk_overlap",
            0,
            100_000,
        )?;
        let chunk_size = retrieval.get("chunk_size").and_then(|v| v.as_u64());
        let chunk_overlap = retrieval.get("chunk_overlap").and_then(|v| v.as_u64());
        if let (Some(size), Some(overlap)) = (chunk_size, chunk_overlap) {
            if overlap >= size {
                return Err(ApiError::BadRequest(
                    "Invalid config at 'retrieval.chunk_overlap': must be smaller than chunk_size"
                        .to_string(),
                ));
            }
        }
    }

    if let Some(chat) = expect_optional_object(root, "chat")? {
        validate_u64_field(chat, "chat.history_limit", "history_limit", 0, 10_000)?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_non_empty_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if text.trim().is_empty() {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': value cannot be empty",
            path
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() || value.as_str().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "string"))
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}
