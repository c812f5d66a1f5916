//! Scripted `LlmProvider` for tests and offline demos.
//!
//! Chat answers are popped from a queue (falling back to an echo of the
//! prompt); embeddings are deterministic character histograms so texts that
//! share characters land close together.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::provider::LlmProvider;
use super::types::ChatRequest;
use crate::core::errors::ApiError;

const EMBEDDING_DIM: usize = 16;

#[derive(Default)]
pub struct MockLlmProvider {
    responses: Mutex<VecDeque<Result<String, ApiError>>>,
    embed_errors: Mutex<VecDeque<ApiError>>,
    requests: Mutex<Vec<ChatRequest>>,
    embedded: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful chat answer.
    pub fn queue_response(&self, answer: impl Into<String>) {
        lock(&self.responses).push_back(Ok(answer.into()));
    }

    /// Queue a chat failure.
    pub fn queue_error(&self, error: ApiError) {
        lock(&self.responses).push_back(Err(error));
    }

    /// Make the next `embed` call fail.
    pub fn queue_embed_error(&self, error: ApiError) {
        lock(&self.embed_errors).push_back(error);
    }

    /// Makes every chat call wait `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    async fn wait(&self) {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// All chat requests seen so far, oldest first.
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        lock(&self.requests).clone()
    }

    /// All texts passed to `embed`, in call order.
    pub fn embedded_texts(&self) -> Vec<String> {
        lock(&self.embedded).clone()
    }

    pub fn embed_text(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; EMBEDDING_DIM];
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            vector[(c as usize) % EMBEDDING_DIM] += 1.0;
        }
        vector
    }

    fn next_answer(&self, request: ChatRequest) -> Result<String, ApiError> {
        let answer = lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Ok(format!("echo: {}", request.prompt())));
        lock(&self.requests).push(request);
        answer
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat(&self, request: ChatRequest) -> Result<String, ApiError> {
        self.wait().await;
        self.next_answer(request)
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
        self.wait().await;
        let answer = self.next_answer(request)?;
        let chars: Vec<char> = answer.chars().collect();
        let (tx, rx) = mpsc::channel(chars.len().max(1));
        for piece in chars.chunks(3) {
            let _ = tx.send(Ok(piece.iter().collect())).await;
        }
        Ok(rx)
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if let Some(error) = lock(&self.embed_errors).pop_front() {
            return Err(error);
        }
        lock(&self.embedded).extend(inputs.iter().cloned());
        Ok(inputs.iter().map(|text| Self::embed_text(text)).collect())
    }
}
