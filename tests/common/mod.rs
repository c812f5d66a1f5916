#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use qianfan_chat::core::config::{AppPaths, ConfigService};
use qianfan_chat::llm::testing::MockLlmProvider;
use qianfan_chat::llm::CredentialStore;
use qianfan_chat::rag::SqliteRagStore;
use qianfan_chat::server::router::router;
use qianfan_chat::state::AppState;

pub struct TestApp {
    pub dir: TempDir,
    pub llm: Arc<MockLlmProvider>,
    pub state: Arc<AppState>,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = Arc::new(AppPaths::from_dirs(
            dir.path().to_path_buf(),
            dir.path().join("data"),
        ));
        let config = ConfigService::new(paths.clone());
        let llm = Arc::new(MockLlmProvider::new());
        let store = SqliteRagStore::open(&dir.path().join("vector_db")).await.unwrap();

        let state = AppState::from_parts(
            paths,
            config,
            CredentialStore::new(),
            llm.clone(),
            Arc::new(store),
        );
        Self { dir, llm, state }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::delete(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send_json("POST", uri, body).await
    }

    pub async fn patch(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send_json("PATCH", uri, body).await
    }

    async fn send_json(&self, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }
}
