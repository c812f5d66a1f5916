use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::protocol::WsIncomingMessage;
use crate::chat::{validate_question, AnswerMode};
use crate::core::errors::ApiError;
use crate::server::router::allowed_origins;
use crate::state::AppState;

type WsSender = SplitSink<WebSocket, Message>;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let origin_ok = validate_origin(&headers, &state);
    ws.on_upgrade(move |socket| handle_socket(socket, state, origin_ok))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, origin_ok: bool) {
    let (mut sender, mut receiver) = socket.split();

    if !origin_ok {
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: 4003,
                reason: "Forbidden: Invalid Origin".into(),
            })))
            .await;
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<WsIncomingMessage>();
    tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<WsIncomingMessage>(&text) {
                    Ok(incoming) => {
                        if tx.send(incoming).is_err() {
                            break;
                        }
                    }
                    Err(err) => tracing::debug!("Ignoring malformed WebSocket frame: {}", err),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let mut current_session_id: Option<String> = None;
    while let Some(incoming) = rx.recv().await {
        if let Err(err) = handle_message(&mut sender, &state, &mut current_session_id, incoming).await
        {
            let _ = send_json(
                &mut sender,
                json!({"type": "error", "message": err.user_message()}),
            )
            .await;
        }
    }
}

async fn handle_message(
    sender: &mut WsSender,
    state: &Arc<AppState>,
    current_session_id: &mut Option<String>,
    data: WsIncomingMessage,
) -> Result<(), ApiError> {
    match data.msg_type.as_deref().unwrap_or("chat") {
        "set_session" => {
            let session_id = state
                .transcripts
                .ensure_session(data.session_id.as_deref())
                .await;
            switch_session(sender, state, current_session_id, session_id).await
        }
        "chat" => handle_chat(sender, state, current_session_id, data).await,
        other => Err(ApiError::BadRequest(format!(
            "Unknown message type '{}'",
            other
        ))),
    }
}

async fn handle_chat(
    sender: &mut WsSender,
    state: &Arc<AppState>,
    current_session_id: &mut Option<String>,
    data: WsIncomingMessage,
) -> Result<(), ApiError> {
    let message = data.message.unwrap_or_default();
    validate_question(&message)?;
    let mode = AnswerMode::parse(data.mode.as_deref())?;

    let requested = data.session_id.or_else(|| current_session_id.clone());
    let session_id = state.transcripts.ensure_session(requested.as_deref()).await;
    if current_session_id.as_deref() != Some(session_id.as_str()) {
        switch_session(sender, state, current_session_id, session_id.clone()).await?;
    }

    send_json(
        sender,
        json!({
            "type": "user_entry",
            "sessionId": session_id,
            "entry": {"role": "user", "text": message.trim(), "mode": mode.as_str()}
        }),
    )
    .await?;

    let (fragments_tx, mut fragments_rx) = mpsc::unbounded_channel::<String>();
    let answer = state
        .chat
        .ask_streaming(&session_id, mode, &message, fragments_tx);
    let forward = async {
        while let Some(fragment) = fragments_rx.recv().await {
            send_json(
                sender,
                json!({"type": "chunk", "message": fragment, "mode": mode.as_str()}),
            )
            .await?;
        }
        Ok::<(), ApiError>(())
    };
    let (turn, forwarded) = tokio::join!(answer, forward);
    forwarded?;

    let turn = turn?;
    send_json(
        sender,
        json!({
            "type": "done",
            "sessionId": turn.session_id,
            "mode": turn.mode,
            "answer": turn.answer,
            "standaloneQuestion": turn.standalone_question,
            "sources": turn.sources
        }),
    )
    .await
}

async fn switch_session(
    sender: &mut WsSender,
    state: &Arc<AppState>,
    current_session_id: &mut Option<String>,
    session_id: String,
) -> Result<(), ApiError> {
    send_json(
        sender,
        json!({"type": "session_changed", "sessionId": session_id}),
    )
    .await?;
    send_history(sender, state, &session_id).await?;
    *current_session_id = Some(session_id);
    Ok(())
}

async fn send_history(
    sender: &mut WsSender,
    state: &Arc<AppState>,
    session_id: &str,
) -> Result<(), ApiError> {
    let messages = state.transcripts.entries(session_id).await?;
    send_json(
        sender,
        json!({"type": "history", "sessionId": session_id, "messages": messages}),
    )
    .await
}

pub async fn send_json(sender: &mut WsSender, payload: Value) -> Result<(), ApiError> {
    let text = serde_json::to_string(&payload).map_err(ApiError::internal)?;
    sender
        .send(Message::Text(text))
        .await
        .map_err(ApiError::internal)?;
    Ok(())
}

/// Browsers always send `Origin`; other clients (CLI tools, tests) may not.
/// The page served by this process is same-origin and always allowed.
fn validate_origin(headers: &HeaderMap, state: &AppState) -> bool {
    let Some(origin) = headers.get("origin").and_then(|v| v.to_str().ok()) else {
        return true;
    };
    let host = headers.get("host").and_then(|v| v.to_str().ok());
    let origin_host = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"));
    if host.is_some() && origin_host == host {
        return true;
    }
    let configured = state
        .config
        .load_settings()
        .map(|settings| settings.server.cors_allowed_origins)
        .unwrap_or_default();
    allowed_origins(&configured)
        .iter()
        .any(|allowed| origin == allowed)
}
