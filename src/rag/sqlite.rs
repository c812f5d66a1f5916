//! SQLite-backed vector index.
//!
//! Lives in `<persist_directory>/index.db`. Metadata is plain SQL, vectors
//! are little-endian f32 blobs and search is brute-force cosine similarity,
//! which is plenty for a course-sized knowledge base.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::store::{ChunkSearchResult, RagStore, StoredChunk};
use crate::core::errors::ApiError;

const INDEX_FILE: &str = "index.db";

pub struct SqliteRagStore {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl SqliteRagStore {
    /// Opens (or creates) the index inside `persist_directory`.
    pub async fn open(persist_directory: &Path) -> Result<Self, ApiError> {
        std::fs::create_dir_all(persist_directory).map_err(|e| {
            ApiError::internal(format!(
                "Failed to create index directory {}: {}",
                persist_directory.display(),
                e
            ))
        })?;
        Self::with_path(persist_directory.join(INDEX_FILE)).await
    }

    pub async fn with_path(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { pool, db_path };
        store.init_schema().await?;
        tracing::info!("Opened vector index at {}", store.db_path.display());
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rag_chunks (
                chunk_id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                chunk_index INTEGER NOT NULL DEFAULT 0,
                metadata TEXT DEFAULT '{}',
                embedding BLOB,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_rag_source ON rag_chunks(source)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rag_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        let denom = norm_a * norm_b;

        if denom <= f32::EPSILON {
            0.0
        } else {
            dot / denom
        }
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> StoredChunk {
        let metadata_str: String = row.try_get("metadata").unwrap_or_default();
        let metadata = serde_json::from_str::<Value>(&metadata_str).ok();
        let chunk_index: i64 = row.try_get("chunk_index").unwrap_or(0);

        StoredChunk {
            chunk_id: row.get("chunk_id"),
            content: row.get("content"),
            source: row.get("source"),
            chunk_index: chunk_index.max(0) as usize,
            metadata,
        }
    }
}

#[async_trait]
impl RagStore for SqliteRagStore {
    async fn insert_batch(&self, items: Vec<(StoredChunk, Vec<f32>)>) -> Result<(), ApiError> {
        if items.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        for (chunk, embedding) in &items {
            let blob = Self::serialize_embedding(embedding);
            let metadata_str = chunk
                .metadata
                .as_ref()
                .map(|m| serde_json::to_string(m).unwrap_or_default())
                .unwrap_or_else(|| "{}".to_string());

            sqlx::query(
                "INSERT OR REPLACE INTO rag_chunks (chunk_id, content, source, chunk_index, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.content)
            .bind(&chunk.source)
            .bind(chunk.chunk_index as i64)
            .bind(&metadata_str)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkSearchResult>, ApiError> {
        let rows = sqlx::query(
            "SELECT chunk_id, content, source, chunk_index, metadata, embedding
             FROM rag_chunks",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut scored: Vec<ChunkSearchResult> = rows
            .iter()
            .filter_map(|row| {
                let embedding_bytes: Vec<u8> = row.try_get("embedding").unwrap_or_default();
                if embedding_bytes.is_empty() {
                    return None;
                }
                let stored_emb = Self::deserialize_embedding(&embedding_bytes);
                if stored_emb.len() != query_embedding.len() {
                    return None;
                }
                let score = Self::cosine_similarity(query_embedding, &stored_emb);

                Some(ChunkSearchResult {
                    chunk: Self::row_to_chunk(row),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit.max(1));

        Ok(scored)
    }

    async fn count(&self, source: Option<&str>) -> Result<usize, ApiError> {
        let count: i64 = if let Some(source) = source {
            sqlx::query_scalar("SELECT COUNT(*) FROM rag_chunks WHERE source = ?1")
                .bind(source)
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::internal)?
        } else {
            sqlx::query_scalar("SELECT COUNT(*) FROM rag_chunks")
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::internal)?
        };

        Ok(count as usize)
    }

    async fn delete_source(&self, source: &str) -> Result<usize, ApiError> {
        let result = sqlx::query("DELETE FROM rag_chunks WHERE source = ?1")
            .bind(source)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() as usize)
    }

    async fn clear(&self) -> Result<(), ApiError> {
        sqlx::query("DELETE FROM rag_chunks")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(())
    }

    async fn embedding_model(&self) -> Result<Option<String>, ApiError> {
        sqlx::query_scalar::<_, String>("SELECT value FROM rag_meta WHERE key = 'embedding_model'")
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)
    }

    async fn set_embedding_model(&self, model: &str) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT OR REPLACE INTO rag_meta (key, value, updated_at)
             VALUES ('embedding_model', ?1, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
        )
        .bind(model)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_chunk(id: &str, content: &str, source: &str, chunk_index: usize) -> StoredChunk {
        StoredChunk {
            chunk_id: id.to_string(),
            content: content.to_string(),
            source: source.to_string(),
            chunk_index,
            metadata: Some(serde_json::json!({ "start_offset": chunk_index * 10 })),
        }
    }

    #[tokio::test]
    async fn open_creates_index_inside_persist_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("data_base").join("vector_db");

        let store = SqliteRagStore::open(&dir).await.unwrap();

        assert_eq!(store.db_path(), dir.join(INDEX_FILE));
        assert!(dir.join(INDEX_FILE).exists());
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn search_orders_by_similarity_and_respects_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteRagStore::open(tmp.path()).await.unwrap();

        store
            .insert_batch(vec![
                (make_chunk("c1", "prompt engineering", "a.md", 0), vec![1.0, 0.0, 0.0]),
                (make_chunk("c2", "vector databases", "a.md", 1), vec![0.0, 1.0, 0.0]),
                (make_chunk("c3", "prompt tips", "b.md", 0), vec![0.9, 0.1, 0.0]),
            ])
            .await
            .unwrap();

        let results = store.search(&[1.0, 0.0, 0.0], 2).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c3"]);
        assert!(results[0].score > 0.99);
        assert_eq!(results[1].chunk.source, "b.md");
        assert_eq!(
            results[0].chunk.metadata.as_ref().unwrap()["start_offset"],
            serde_json::json!(0)
        );
    }

    #[tokio::test]
    async fn search_skips_vectors_of_another_dimension() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteRagStore::open(tmp.path()).await.unwrap();

        store
            .insert_batch(vec![
                (make_chunk("wide", "384-dim chunk", "a.md", 0), vec![0.1; 384]),
                (make_chunk("narrow", "3-dim chunk", "b.md", 0), vec![1.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let results = store.search(&[1.0, 0.0, 0.0], 4).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["narrow"]);

        assert!(store.search(&[0.5; 16], 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn index_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = SqliteRagStore::open(tmp.path()).await.unwrap();
            store
                .insert_batch(vec![(make_chunk("c1", "persisted", "a.md", 0), vec![1.0])])
                .await
                .unwrap();
            store.set_embedding_model("embedding-v1").await.unwrap();
        }

        let reopened = SqliteRagStore::open(tmp.path()).await.unwrap();
        assert_eq!(reopened.count(None).await.unwrap(), 1);
        assert_eq!(
            reopened.embedding_model().await.unwrap().as_deref(),
            Some("embedding-v1")
        );
    }

    #[tokio::test]
    async fn delete_source_and_clear() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteRagStore::open(tmp.path()).await.unwrap();

        store
            .insert_batch(vec![
                (make_chunk("c1", "one", "a.md", 0), vec![1.0]),
                (make_chunk("c2", "two", "a.md", 1), vec![1.0]),
                (make_chunk("c3", "three", "b.md", 0), vec![1.0]),
            ])
            .await
            .unwrap();

        assert_eq!(store.count(Some("a.md")).await.unwrap(), 2);
        assert_eq!(store.delete_source("a.md").await.unwrap(), 2);
        assert_eq!(store.count(None).await.unwrap(), 1);

        store.clear().await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[test]
    fn embedding_blob_round_trips() {
        let vector = vec![0.25_f32, -1.5, 3.0];
        let bytes = SqliteRagStore::serialize_embedding(&vector);
        assert_eq!(bytes.len(), 12);
        assert_eq!(SqliteRagStore::deserialize_embedding(&bytes), vector);
    }
}
