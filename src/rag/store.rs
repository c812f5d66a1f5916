//! RagStore trait — abstract interface over the persisted vector index.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// A stored chunk with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    /// Unique chunk identifier.
    pub chunk_id: String,
    /// The text content of the chunk.
    pub content: String,
    /// Source identifier (file name, URL, ...).
    pub source: String,
    /// Position of the chunk within its source.
    pub chunk_index: usize,
    /// Optional metadata (JSON).
    pub metadata: Option<serde_json::Value>,
}

/// Result of a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSearchResult {
    pub chunk: StoredChunk,
    /// Cosine similarity (higher = better).
    pub score: f32,
}

#[async_trait]
pub trait RagStore: Send + Sync {
    /// Insert chunks with their embedding vectors in one transaction.
    async fn insert_batch(&self, items: Vec<(StoredChunk, Vec<f32>)>) -> Result<(), ApiError>;

    /// Chunks most similar to the query embedding, best first.
    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkSearchResult>, ApiError>;

    /// Total chunk count, optionally for one source.
    async fn count(&self, source: Option<&str>) -> Result<usize, ApiError>;

    /// Delete all chunks of a source; returns how many were removed.
    async fn delete_source(&self, source: &str) -> Result<usize, ApiError>;

    /// Remove every chunk.
    async fn clear(&self) -> Result<(), ApiError>;

    /// Embedding model the index was built with, if recorded.
    async fn embedding_model(&self) -> Result<Option<String>, ApiError>;

    async fn set_embedding_model(&self, model: &str) -> Result<(), ApiError>;
}
