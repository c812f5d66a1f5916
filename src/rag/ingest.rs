use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::splitter::TextSplitter;
use super::store::{RagStore, StoredChunk};
use crate::core::errors::ApiError;
use crate::llm::LlmProvider;

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub source: String,
    pub chunks: usize,
    /// Chunks of an earlier version of the same source that were replaced.
    pub replaced: usize,
}

/// Splits documents, embeds the chunks and writes them to the index.
pub struct Ingestor {
    provider: Arc<dyn LlmProvider>,
    store: Arc<dyn RagStore>,
    splitter: TextSplitter,
    embedding_model: String,
}

impl Ingestor {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        store: Arc<dyn RagStore>,
        splitter: TextSplitter,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            store,
            splitter,
            embedding_model: embedding_model.into(),
        }
    }

    pub async fn ingest_text(&self, source: &str, text: &str) -> Result<IngestReport, ApiError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(ApiError::BadRequest("Document source is required".to_string()));
        }

        self.ensure_same_embedding_model().await?;

        let chunks = self.splitter.split(text, source);
        if chunks.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Document '{}' contains no text",
                source
            )));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.provider.embed(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(ApiError::Upstream(format!(
                "Embedding API returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        // Old chunks go only once the new ones are embedded.
        let replaced = self.store.delete_source(source).await?;

        let items: Vec<(StoredChunk, Vec<f32>)> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                let stored = StoredChunk {
                    chunk_id: Uuid::new_v4().to_string(),
                    content: chunk.text,
                    source: chunk.source,
                    chunk_index: chunk.chunk_index,
                    metadata: Some(json!({ "start_offset": chunk.start_offset })),
                };
                (stored, embedding)
            })
            .collect();
        let count = items.len();

        self.store.insert_batch(items).await?;
        self.store.set_embedding_model(&self.embedding_model).await?;

        tracing::info!(
            "Ingested '{}' as {} chunks (replaced {})",
            source,
            count,
            replaced
        );

        Ok(IngestReport {
            source: source.to_string(),
            chunks: count,
            replaced,
        })
    }

    async fn ensure_same_embedding_model(&self) -> Result<(), ApiError> {
        let Some(indexed_with) = self.store.embedding_model().await? else {
            return Ok(());
        };
        if indexed_with == self.embedding_model || self.store.count(None).await? == 0 {
            return Ok(());
        }
        Err(ApiError::BadRequest(format!(
            "Index was built with embedding model '{}'; clear it before ingesting with '{}'",
            indexed_with, self.embedding_model
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::MockLlmProvider;
    use crate::rag::SqliteRagStore;

    async fn ingestor(
        dir: &tempfile::TempDir,
        model: &str,
    ) -> (Ingestor, Arc<MockLlmProvider>, Arc<SqliteRagStore>) {
        let provider = Arc::new(MockLlmProvider::new());
        let store = Arc::new(SqliteRagStore::open(dir.path()).await.unwrap());
        let ingestor = Ingestor::new(
            provider.clone(),
            store.clone(),
            TextSplitter::new(20, 5),
            model,
        );
        (ingestor, provider, store)
    }

    #[tokio::test]
    async fn ingest_splits_embeds_and_records_model() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, provider, store) = ingestor(&dir, "embedding-v1").await;

        let text = "Prompt engineering matters.\n\nRetrieval grounds the answer in documents.";
        let report = ingestor.ingest_text("notes.md", text).await.unwrap();

        assert!(report.chunks > 1);
        assert_eq!(report.replaced, 0);
        assert_eq!(store.count(Some("notes.md")).await.unwrap(), report.chunks);
        assert_eq!(provider.embedded_texts().len(), report.chunks);
        assert_eq!(
            store.embedding_model().await.unwrap().as_deref(),
            Some("embedding-v1")
        );
    }

    #[tokio::test]
    async fn reingesting_a_source_replaces_its_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, _, store) = ingestor(&dir, "embedding-v1").await;

        let first = ingestor
            .ingest_text("notes.md", "one two three four five six seven eight nine ten")
            .await
            .unwrap();
        let second = ingestor.ingest_text("notes.md", "short").await.unwrap();

        assert_eq!(second.replaced, first.chunks);
        assert_eq!(store.count(Some("notes.md")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_embedding_keeps_previous_version() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, provider, store) = ingestor(&dir, "embedding-v1").await;
        ingestor.ingest_text("notes.md", "first version").await.unwrap();

        provider.queue_embed_error(ApiError::Upstream("Access token invalid".into()));
        assert!(ingestor.ingest_text("notes.md", "second version").await.is_err());
        assert_eq!(store.count(Some("notes.md")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rejects_blank_source_and_empty_text() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, _, _) = ingestor(&dir, "embedding-v1").await;

        assert!(matches!(
            ingestor.ingest_text("  ", "text").await,
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            ingestor.ingest_text("empty.md", "   \n").await,
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn refuses_to_mix_embedding_models() {
        let dir = tempfile::tempdir().unwrap();
        let (first, _, store) = ingestor(&dir, "embedding-v1").await;
        first.ingest_text("a.md", "alpha").await.unwrap();

        let other = Ingestor::new(
            Arc::new(MockLlmProvider::new()),
            store,
            TextSplitter::new(20, 5),
            "bge-large-zh",
        );
        assert!(matches!(
            other.ingest_text("b.md", "beta").await,
            Err(ApiError::BadRequest(_))
        ));
    }
}
