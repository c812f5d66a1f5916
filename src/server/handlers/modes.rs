use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::chat::AnswerMode;

pub const MODE_QUESTION: &str = "你想选择哪种模式进行对话？";

pub async fn list_modes() -> impl IntoResponse {
    let modes: Vec<Value> = AnswerMode::all()
        .into_iter()
        .map(|mode| json!({"value": mode.as_str(), "caption": mode.caption()}))
        .collect();
    Json(json!({
        "label": MODE_QUESTION,
        "default": AnswerMode::default().as_str(),
        "modes": modes
    }))
}
