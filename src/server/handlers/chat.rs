use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::chat::AnswerMode;
use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    pub session_id: Option<String>,
    pub mode: Option<String>,
    pub message: String,
}

/// Non-streaming turn; returns the answer and the updated transcript.
pub async fn post_chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mode = AnswerMode::parse(payload.mode.as_deref())?;
    let session_id = state
        .transcripts
        .ensure_session(payload.session_id.as_deref())
        .await;

    let turn = state.chat.ask(&session_id, mode, &payload.message).await?;
    let messages = state.transcripts.entries(&session_id).await?;

    Ok(Json(json!({
        "session_id": turn.session_id,
        "mode": turn.mode,
        "answer": turn.answer,
        "standalone_question": turn.standalone_question,
        "sources": turn.sources,
        "messages": messages
    })))
}
