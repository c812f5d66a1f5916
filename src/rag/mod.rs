//! Retrieval over the persisted embedding index.
//!
//! - `RagStore` / `SqliteRagStore`: the on-disk vector index
//! - `TextSplitter`: overlapping character chunks for ingestion
//! - `Retriever`: query embedding + top-k similarity search
//! - `Ingestor`: split, embed and store documents

mod ingest;
mod retriever;
mod splitter;
mod sqlite;
mod store;

pub use ingest::{IngestReport, Ingestor};
pub use retriever::Retriever;
pub use splitter::{TextChunk, TextSplitter};
pub use sqlite::SqliteRagStore;
pub use store::{ChunkSearchResult, RagStore, StoredChunk};
