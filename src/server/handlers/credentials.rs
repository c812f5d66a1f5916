use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::core::errors::ApiError;
use crate::state::AppState;

/// AK/SK as typed into the sidebar. Blank values clear the UI credentials
/// so the environment or secrets file applies again.
#[derive(Debug, Deserialize)]
pub struct SetCredentialsRequest {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
}

pub async fn get_credentials(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state.config.load_settings()?;
    Ok(Json(state.credentials.status(&settings.qianfan)))
}

pub async fn set_credentials(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SetCredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if state.credentials.set(&payload.api_key, &payload.secret_key) {
        tracing::info!("Qianfan credentials set from the UI");
    } else {
        tracing::info!("UI credentials cleared");
    }
    let settings = state.config.load_settings()?;
    Ok(Json(state.credentials.status(&settings.qianfan)))
}

pub async fn clear_credentials(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    state.credentials.clear();
    tracing::info!("UI credentials cleared");
    let settings = state.config.load_settings()?;
    Ok(Json(state.credentials.status(&settings.qianfan)))
}
