use std::sync::Arc;

use crate::chat::ChatService;
use crate::core::config::{AppPaths, ConfigService};
use crate::llm::{CredentialStore, LlmProvider, QianfanProvider};
use crate::rag::{RagStore, SqliteRagStore};
use crate::transcript::TranscriptStore;

pub mod error;

use error::InitializationError;

/// Application state shared by every route and WebSocket connection.
///
/// Credentials are process-wide: once entered in any browser tab they apply
/// to all sessions, while transcripts stay per session.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub credentials: CredentialStore,
    pub transcripts: TranscriptStore,
    pub llm: Arc<dyn LlmProvider>,
    pub rag_store: Arc<dyn RagStore>,
    pub chat: ChatService,
}

impl AppState {
    /// Resolves paths, opens the persisted index and wires the Qianfan
    /// client into the chat service.
    pub async fn initialize() -> Result<Arc<Self>, InitializationError> {
        let paths = Arc::new(AppPaths::new());
        let config = ConfigService::new(paths.clone());
        let settings = config
            .load_settings()
            .map_err(|e| InitializationError::Config(e.into()))?;

        let credentials = CredentialStore::new();
        let llm: Arc<dyn LlmProvider> =
            Arc::new(QianfanProvider::new(config.clone(), credentials.clone()));

        let index_dir = paths.resolve(&settings.retrieval.persist_directory);
        let rag_store: Arc<dyn RagStore> = Arc::new(
            SqliteRagStore::open(&index_dir)
                .await
                .map_err(|e| InitializationError::Rag(e.into()))?,
        );

        Ok(Self::from_parts(paths, config, credentials, llm, rag_store))
    }

    /// Assembles state from already-built parts (tests, alternative providers).
    pub fn from_parts(
        paths: Arc<AppPaths>,
        config: ConfigService,
        credentials: CredentialStore,
        llm: Arc<dyn LlmProvider>,
        rag_store: Arc<dyn RagStore>,
    ) -> Arc<Self> {
        let transcripts = TranscriptStore::new();
        let chat = ChatService::new(
            llm.clone(),
            rag_store.clone(),
            transcripts.clone(),
            config.clone(),
        );

        Arc::new(AppState {
            paths,
            config,
            credentials,
            transcripts,
            llm,
            rag_store,
            chat,
        })
    }
}
