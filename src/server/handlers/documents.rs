use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::rag::{Ingestor, TextSplitter};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub source: String,
    pub text: String,
}

pub async fn ingest_document(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<IngestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state.config.load_settings()?;
    let ingestor = Ingestor::new(
        state.llm.clone(),
        state.rag_store.clone(),
        TextSplitter::from_settings(&settings.retrieval),
        settings.qianfan.embedding_endpoint,
    );
    let report = ingestor.ingest_text(&payload.source, &payload.text).await?;
    Ok(Json(report))
}

pub async fn index_stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let chunks = state.rag_store.count(None).await?;
    let embedding_model = state.rag_store.embedding_model().await?;
    Ok(Json(json!({
        "chunks": chunks,
        "embedding_model": embedding_model
    })))
}

pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.rag_store.delete_source(&source).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound(format!("No chunks indexed for '{}'", source)));
    }
    tracing::info!("Removed {} chunks of '{}' from the index", deleted, source);
    Ok(Json(json!({"deleted": deleted})))
}

pub async fn clear_index(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state.rag_store.clear().await?;
    tracing::info!("Cleared the vector index");
    Ok(Json(json!({"success": true})))
}
