use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    /// A hosted service (LLM, embedding, token endpoint) failed; the message
    /// is passed through unchanged.
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }

    pub fn upstream<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Upstream(err.to_string())
    }

    /// Message shown to the user without the variant prefix.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::MissingCredentials(msg)
            | ApiError::Upstream(msg)
            | ApiError::Internal(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MissingCredentials(_) => StatusCode::UNAUTHORIZED,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.user_message() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_errors_map_to_bad_gateway() {
        let response = ApiError::Upstream("Open api daily request limit reached".to_string())
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn user_message_drops_variant_prefix() {
        let err = ApiError::MissingCredentials("Qianfan AK/SK are not configured".to_string());
        assert_eq!(err.user_message(), "Qianfan AK/SK are not configured");
        assert_eq!(
            err.to_string(),
            "missing credentials: Qianfan AK/SK are not configured"
        );
    }
}
