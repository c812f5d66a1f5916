//! Baidu Qianfan (ERNIE) chat and embedding client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

use super::credentials::{CredentialStore, Credentials};
use super::provider::LlmProvider;
use super::types::ChatRequest;
use crate::core::config::settings::QianfanSettings;
use crate::core::config::ConfigService;
use crate::core::errors::ApiError;

const WORKSHOP_PATH: &str = "rpc/2.0/ai_custom/v1/wenxinworkshop";
/// Embedding-V1 accepts at most 16 texts per call.
const EMBEDDING_BATCH_SIZE: usize = 16;
/// Refresh tokens a minute before Qianfan says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);
/// 110: invalid access token, 111: expired access token.
const TOKEN_ERROR_CODES: [i64; 2] = [110, 111];

struct CachedToken {
    credentials: Credentials,
    token: String,
    expires_at: Instant,
}

type TokenCache = Arc<Mutex<Option<CachedToken>>>;

#[derive(Clone)]
pub struct QianfanProvider {
    client: Client,
    config: ConfigService,
    credentials: CredentialStore,
    token: TokenCache,
}

impl QianfanProvider {
    pub fn new(config: ConfigService, credentials: CredentialStore) -> Self {
        Self {
            client: Client::new(),
            config,
            credentials,
            token: Arc::new(Mutex::new(None)),
        }
    }

    fn settings(&self) -> Result<QianfanSettings, ApiError> {
        Ok(self.config.load_settings()?.qianfan)
    }

    async fn access_token(&self, settings: &QianfanSettings) -> Result<String, ApiError> {
        let credentials = self.credentials.resolve(settings)?;

        {
            let cache = self.token.lock().await;
            if let Some(cached) = cache.as_ref() {
                if cached.credentials == credentials && cached.expires_at > Instant::now() {
                    return Ok(cached.token.clone());
                }
            }
        }

        let url = format!("{}/oauth/2.0/token", settings.api_base.trim_end_matches('/'));
        let res = self
            .client
            .post(&url)
            .query(&[
                ("grant_type", "client_credentials"),
                ("client_id", credentials.api_key.as_str()),
                ("client_secret", credentials.secret_key.as_str()),
            ])
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .send()
            .await
            .map_err(ApiError::upstream)?;

        let payload: Value = res.json().await.map_err(ApiError::upstream)?;
        let (token, expires_in) = parse_token_response(&payload)?;
        tracing::info!("Obtained Qianfan access token (expires in {}s)", expires_in);

        let lifetime = Duration::from_secs(expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        let mut cache = self.token.lock().await;
        *cache = Some(CachedToken {
            credentials,
            token: token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(token)
    }

    async fn post_workshop(
        &self,
        settings: &QianfanSettings,
        path: &str,
        body: &Value,
    ) -> Result<reqwest::Response, ApiError> {
        let token = self.access_token(settings).await?;
        let url = format!(
            "{}/{}/{}",
            settings.api_base.trim_end_matches('/'),
            WORKSHOP_PATH,
            path
        );

        let res = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str())])
            .json(body)
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .send()
            .await
            .map_err(ApiError::upstream)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "Qianfan HTTP {}: {}",
                status, text
            )));
        }

        Ok(res)
    }

    async fn post_workshop_json(
        &self,
        settings: &QianfanSettings,
        path: &str,
        body: &Value,
    ) -> Result<Value, ApiError> {
        let res = self.post_workshop(settings, path, body).await?;
        let payload: Value = res.json().await.map_err(ApiError::upstream)?;
        if let Some((code, message)) = qianfan_error(&payload) {
            if TOKEN_ERROR_CODES.contains(&code) {
                invalidate_token(&self.token).await;
            }
            return Err(upstream_error(code, &message));
        }
        Ok(payload)
    }
}

#[async_trait]
impl LlmProvider for QianfanProvider {
    fn name(&self) -> &str {
        "qianfan"
    }

    async fn chat(&self, request: ChatRequest) -> Result<String, ApiError> {
        let settings = self.settings()?;
        let body = build_chat_body(&request, false);
        let path = format!("chat/{}", settings.chat_endpoint);
        tracing::debug!("Qianfan chat request to {}", path);

        let payload = self.post_workshop_json(&settings, &path, &body).await?;
        parse_chat_response(&payload)
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
        let settings = self.settings()?;
        let body = build_chat_body(&request, true);
        let path = format!("chat/{}", settings.chat_endpoint);
        tracing::debug!("Qianfan streaming chat request to {}", path);

        let res = self.post_workshop(&settings, &path, &body).await?;

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();
        let token_cache = self.token.clone();

        tokio::spawn(async move {
            let mut lines = LineBuffer::default();
            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(ApiError::upstream(e))).await;
                        return;
                    }
                };
                for line in lines.push(&bytes) {
                    if !forward_stream_line(&line, &tx, &token_cache).await {
                        return;
                    }
                }
            }
            if let Some(line) = lines.finish() {
                forward_stream_line(&line, &tx, &token_cache).await;
            }
        });

        Ok(rx)
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let settings = self.settings()?;
        let path = format!("embeddings/{}", settings.embedding_endpoint);

        let mut embeddings = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(EMBEDDING_BATCH_SIZE) {
            let body = json!({ "input": batch });
            let payload = self.post_workshop_json(&settings, &path, &body).await?;
            embeddings.extend(parse_embedding_response(&payload, batch.len())?);
        }

        Ok(embeddings)
    }
}

/// Forwards one stream line; returns `false` once the stream is finished or
/// the receiver is gone.
async fn forward_stream_line(
    line: &str,
    tx: &mpsc::Sender<Result<String, ApiError>>,
    token_cache: &TokenCache,
) -> bool {
    match parse_stream_line(line) {
        StreamEvent::Ignore => true,
        StreamEvent::Fragment { text, is_end } => {
            if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
                return false;
            }
            !is_end
        }
        StreamEvent::Error { code, message } => {
            if TOKEN_ERROR_CODES.contains(&code) {
                invalidate_token(token_cache).await;
            }
            let _ = tx.send(Err(upstream_error(code, &message))).await;
            false
        }
    }
}

async fn invalidate_token(cache: &TokenCache) {
    let mut guard = cache.lock().await;
    if guard.take().is_some() {
        tracing::warn!("Dropped cached Qianfan access token after token error");
    }
}

fn build_chat_body(request: &ChatRequest, stream: bool) -> Value {
    let mut body = json!({
        "messages": request.messages,
        "stream": stream,
    });

    if let Some(obj) = body.as_object_mut() {
        if let Some(system) = &request.system {
            obj.insert("system".to_string(), json!(system));
        }
        if let Some(t) = request.temperature {
            obj.insert("temperature".to_string(), json!(t));
        }
        if let Some(p) = request.top_p {
            obj.insert("top_p".to_string(), json!(p));
        }
    }

    body
}

fn parse_token_response(payload: &Value) -> Result<(String, u64), ApiError> {
    if let Some(error) = payload.get("error").and_then(|v| v.as_str()) {
        let description = payload
            .get("error_description")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        return Err(ApiError::Upstream(format!(
            "Qianfan token error {}: {}",
            error, description
        )));
    }

    let token = payload
        .get("access_token")
        .and_then(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ApiError::Upstream("Qianfan token response has no access_token".to_string())
        })?;
    let expires_in = payload
        .get("expires_in")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    Ok((token.to_string(), expires_in))
}

fn qianfan_error(payload: &Value) -> Option<(i64, String)> {
    let code = payload.get("error_code").and_then(|v| v.as_i64())?;
    if code == 0 {
        return None;
    }
    let message = payload
        .get("error_msg")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown error")
        .to_string();
    Some((code, message))
}

fn upstream_error(code: i64, message: &str) -> ApiError {
    ApiError::Upstream(format!("Qianfan error {}: {}", code, message))
}

fn parse_chat_response(payload: &Value) -> Result<String, ApiError> {
    if let Some((code, message)) = qianfan_error(payload) {
        return Err(upstream_error(code, &message));
    }
    payload
        .get("result")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ApiError::Upstream("Qianfan chat response has no result".to_string()))
}

fn parse_embedding_response(payload: &Value, expected: usize) -> Result<Vec<Vec<f32>>, ApiError> {
    if let Some((code, message)) = qianfan_error(payload) {
        return Err(upstream_error(code, &message));
    }

    let data = payload
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ApiError::Upstream("Qianfan embedding response has no data".to_string()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = data
        .iter()
        .enumerate()
        .map(|(position, item)| {
            let index = item
                .get("index")
                .and_then(|v| v.as_u64())
                .map(|v| v as usize)
                .unwrap_or(position);
            let vector = item
                .get("embedding")
                .and_then(|v| v.as_array())
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect()
                })
                .unwrap_or_default();
            (index, vector)
        })
        .collect();
    indexed.sort_by_key(|(index, _)| *index);

    if indexed.len() != expected {
        return Err(ApiError::Upstream(format!(
            "Qianfan returned {} embeddings for {} inputs",
            indexed.len(),
            expected
        )));
    }

    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}

#[derive(Debug, PartialEq)]
enum StreamEvent {
    Fragment { text: String, is_end: bool },
    Error { code: i64, message: String },
    Ignore,
}

/// Parses one line of a streamed chat response. Successful streams are
/// `data: {json}` lines; a failed request answers with a bare JSON error body.
fn parse_stream_line(line: &str) -> StreamEvent {
    let line = line.trim();
    if line.is_empty() {
        return StreamEvent::Ignore;
    }

    let data = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
    let Ok(payload) = serde_json::from_str::<Value>(data) else {
        return StreamEvent::Ignore;
    };

    if let Some((code, message)) = qianfan_error(&payload) {
        return StreamEvent::Error { code, message };
    }

    let text = payload
        .get("result")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let is_end = payload
        .get("is_end")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    StreamEvent::Fragment { text, is_end }
}

/// Reassembles newline-terminated lines from network chunks, which may split
/// lines and multi-byte characters anywhere.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}
