use std::sync::Arc;

use super::store::{ChunkSearchResult, RagStore};
use crate::core::errors::ApiError;
use crate::llm::LlmProvider;

/// Similarity retriever over the persisted index: embeds the query with the
/// hosted embedding API and returns the `top_k` closest chunks.
pub struct Retriever {
    provider: Arc<dyn LlmProvider>,
    store: Arc<dyn RagStore>,
    top_k: usize,
    embedding_model: String,
}

impl Retriever {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        store: Arc<dyn RagStore>,
        top_k: usize,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            store,
            top_k: top_k.max(1),
            embedding_model: embedding_model.into(),
        }
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<ChunkSearchResult>, ApiError> {
        if self.store.count(None).await? == 0 {
            tracing::warn!("Vector index is empty; answering without retrieved context");
            return Ok(Vec::new());
        }

        if let Some(indexed_with) = self.store.embedding_model().await? {
            if indexed_with != self.embedding_model {
                return Err(ApiError::BadRequest(format!(
                    "Index was built with embedding model '{}'; clear it before querying with '{}'",
                    indexed_with, self.embedding_model
                )));
            }
        }

        let query_embedding = self
            .provider
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Upstream("Embedding API returned no vector".to_string()))?;

        let results = self.store.search(&query_embedding, self.top_k).await?;
        tracing::debug!("Retrieved {} chunks for query", results.len());
        Ok(results)
    }
}
