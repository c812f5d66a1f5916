mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use common::TestApp;
use qianfan_chat::core::errors::ApiError;
use qianfan_chat::transcript::Role;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(app: &TestApp) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, frame: Value) {
    socket
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

async fn next_frame(socket: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if msg.is_text() {
            return serde_json::from_str(msg.to_text().unwrap()).unwrap();
        }
    }
}

/// Reads frames until `done` or `error`, returning all of them.
async fn read_turn(socket: &mut Socket) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        let frame = next_frame(socket).await;
        let last = matches!(frame["type"].as_str(), Some("done") | Some("error"));
        frames.push(frame);
        if last {
            return frames;
        }
    }
}

fn types(frames: &[Value]) -> Vec<String> {
    frames
        .iter()
        .map(|f| f["type"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn chat_frame_streams_answer_and_updates_transcript() {
    let app = TestApp::new().await;
    let addr = serve(&app).await;
    let mut socket = connect(addr).await;
    app.llm.queue_response("你好，我是一个助手。");

    send(
        &mut socket,
        json!({"type": "chat", "message": "你好", "mode": "None"}),
    )
    .await;
    let frames = read_turn(&mut socket).await;
    let kinds = types(&frames);

    assert_eq!(&kinds[..3], &["session_changed", "history", "user_entry"]);
    assert_eq!(kinds.last().map(String::as_str), Some("done"));
    assert!(kinds.iter().filter(|k| *k == "chunk").count() > 1);

    let streamed: String = frames
        .iter()
        .filter(|f| f["type"] == "chunk")
        .map(|f| f["message"].as_str().unwrap())
        .collect();
    assert_eq!(streamed, "你好，我是一个助手。");

    let session_id = frames[0]["sessionId"].as_str().unwrap();
    let entries = app.state.transcripts.entries(session_id).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].role, Role::User);
    assert_eq!(entries[1].role, Role::Assistant);
    assert_eq!(entries[1].text, "你好，我是一个助手。");
}

#[tokio::test]
async fn set_session_replays_history() {
    let app = TestApp::new().await;
    let addr = serve(&app).await;

    let mut first = connect(addr).await;
    send(
        &mut first,
        json!({"type": "chat", "message": "记住我", "sessionId": "tab-7"}),
    )
    .await;
    read_turn(&mut first).await;

    let mut second = connect(addr).await;
    send(&mut second, json!({"type": "set_session", "sessionId": "tab-7"})).await;

    let changed = next_frame(&mut second).await;
    assert_eq!(changed["type"], "session_changed");
    assert_eq!(changed["sessionId"], "tab-7");

    let history = next_frame(&mut second).await;
    assert_eq!(history["type"], "history");
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["text"], "记住我");
    assert_eq!(messages[1]["role"], "assistant");
}

#[tokio::test]
async fn upstream_error_becomes_error_frame() {
    let app = TestApp::new().await;
    let addr = serve(&app).await;
    let mut socket = connect(addr).await;
    app.llm.queue_error(ApiError::MissingCredentials(
        "Qianfan AK/SK are not configured".to_string(),
    ));

    send(
        &mut socket,
        json!({"type": "chat", "message": "hi", "sessionId": "s-err"}),
    )
    .await;
    let frames = read_turn(&mut socket).await;

    let last = frames.last().unwrap();
    assert_eq!(last["type"], "error");
    assert_eq!(last["message"], "Qianfan AK/SK are not configured");
    assert!(!types(&frames).contains(&"chunk".to_string()));

    let entries = app.state.transcripts.entries("s-err").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].role, Role::User);
}

#[tokio::test]
async fn unknown_mode_is_reported_without_touching_transcript() {
    let app = TestApp::new().await;
    let addr = serve(&app).await;
    let mut socket = connect(addr).await;

    send(
        &mut socket,
        json!({"type": "chat", "message": "hi", "mode": "agent", "sessionId": "s-mode"}),
    )
    .await;
    let frame = next_frame(&mut socket).await;
    assert_eq!(frame["type"], "error");
    assert!(!app.state.transcripts.exists("s-mode").await);
}

#[tokio::test]
async fn blank_message_is_reported_as_error() {
    let app = TestApp::new().await;
    let addr = serve(&app).await;
    let mut socket = connect(addr).await;

    send(
        &mut socket,
        json!({"type": "chat", "message": "   ", "sessionId": "s-blank"}),
    )
    .await;
    let frame = next_frame(&mut socket).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["message"], "Message must not be empty");
    assert!(!app.state.transcripts.exists("s-blank").await);
    assert!(app.llm.recorded_requests().is_empty());
}
