use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions = state.transcripts.list_sessions().await;
    Json(json!({"sessions": sessions}))
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = state.transcripts.create_session().await;
    let session = state.transcripts.session(&session_id).await?;
    Ok(Json(json!({"session": session})))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.transcripts.session(&session_id).await?;
    let messages = state.transcripts.entries(&session_id).await?;
    Ok(Json(json!({"session": session, "messages": messages})))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.transcripts.session(&session_id).await?;
    // An in-flight turn would otherwise recreate the session when it finishes.
    let _turn = state.transcripts.turn_lock(&session_id).await;
    state.transcripts.delete_session(&session_id).await?;
    Ok(Json(json!({"success": true})))
}

pub async fn get_session_messages(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state.transcripts.entries(&session_id).await?;
    Ok(Json(json!({"messages": messages})))
}

pub async fn clear_session_messages(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.transcripts.session(&session_id).await?;
    // Waits for an in-flight turn so it cannot land after the clear.
    let _turn = state.transcripts.turn_lock(&session_id).await;
    state.transcripts.clear(&session_id).await?;
    Ok(Json(json!({"success": true})))
}
