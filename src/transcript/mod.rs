//! Per-session chat transcripts, kept in process memory.
//!
//! A session is an ordered list of entries plus a turn lock; holding the lock
//! for a whole user→assistant turn keeps two turns from interleaving.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    /// Answer mode active when the entry was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn user(text: impl Into<String>, mode: Option<&str>) -> Self {
        Self::new(Role::User, text, mode)
    }

    pub fn assistant(text: impl Into<String>, mode: Option<&str>) -> Self {
        Self::new(Role::Assistant, text, mode)
    }

    fn new(role: Role, text: impl Into<String>, mode: Option<&str>) -> Self {
        Self {
            role,
            text: text.into(),
            mode: mode.map(str::to_string),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub preview: Option<String>,
}

struct Session {
    entries: Vec<TranscriptEntry>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    turn: Arc<Mutex<()>>,
}

impl Session {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            entries: Vec::new(),
            created_at: now,
            updated_at: now,
            turn: Arc::new(Mutex::new(())),
        }
    }

    fn info(&self, id: &str) -> SessionInfo {
        SessionInfo {
            id: id.to_string(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            message_count: self.entries.len(),
            preview: self
                .entries
                .iter()
                .find(|e| e.role == Role::User)
                .map(|e| e.text.chars().take(60).collect()),
        }
    }
}

#[derive(Clone, Default)]
pub struct TranscriptStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_session(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.sessions.write().await.insert(id.clone(), Session::new());
        tracing::debug!("Created session {}", id);
        id
    }

    /// Returns `session_id` when given (creating the session if unknown),
    /// otherwise a fresh session id.
    pub async fn ensure_session(&self, session_id: Option<&str>) -> String {
        match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => {
                self.sessions
                    .write()
                    .await
                    .entry(id.to_string())
                    .or_insert_with(Session::new);
                id.to_string()
            }
            None => self.create_session().await,
        }
    }

    pub async fn exists(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Most recently updated first.
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut infos: Vec<SessionInfo> = sessions
            .iter()
            .map(|(id, session)| session.info(id))
            .collect();
        infos.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        infos
    }

    pub async fn session(&self, session_id: &str) -> Result<SessionInfo, ApiError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.info(session_id))
            .ok_or_else(|| session_not_found(session_id))
    }

    pub async fn entries(&self, session_id: &str) -> Result<Vec<TranscriptEntry>, ApiError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.entries.clone())
            .ok_or_else(|| session_not_found(session_id))
    }

    pub async fn append(&self, session_id: &str, entry: TranscriptEntry) {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(Session::new);
        session.updated_at = entry.timestamp;
        session.entries.push(entry);
    }

    pub async fn clear(&self, session_id: &str) -> Result<(), ApiError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| session_not_found(session_id))?;
        session.entries.clear();
        session.updated_at = Utc::now();
        Ok(())
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), ApiError> {
        self.sessions
            .write()
            .await
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| session_not_found(session_id))
    }

    /// Waits for exclusive use of the session for one turn.
    pub async fn turn_lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let turn = {
            let mut sessions = self.sessions.write().await;
            sessions
                .entry(session_id.to_string())
                .or_insert_with(Session::new)
                .turn
                .clone()
        };
        turn.lock_owned().await
    }
}

fn session_not_found(session_id: &str) -> ApiError {
    ApiError::NotFound(format!("Session '{}' not found", session_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn entries_keep_append_order() {
        let store = TranscriptStore::new();
        let id = store.create_session().await;

        store.append(&id, TranscriptEntry::user("你好", None)).await;
        store
            .append(&id, TranscriptEntry::assistant("你好！有什么可以帮你？", None))
            .await;

        let entries = store.entries(&id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[1].role, Role::Assistant);
        assert_eq!(entries[1].text, "你好！有什么可以帮你？");
    }

    #[tokio::test]
    async fn ensure_session_creates_unknown_ids_and_keeps_known_ones() {
        let store = TranscriptStore::new();
        let fresh = store.ensure_session(None).await;
        assert!(store.exists(&fresh).await);

        let named = store.ensure_session(Some("tab-1")).await;
        assert_eq!(named, "tab-1");
        store.append("tab-1", TranscriptEntry::user("hi", None)).await;
        store.ensure_session(Some("tab-1")).await;
        assert_eq!(store.entries("tab-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let store = TranscriptStore::new();
        let a = store.create_session().await;
        let b = store.create_session().await;
        store.append(&a, TranscriptEntry::user("only in a", None)).await;

        assert_eq!(store.entries(&a).await.unwrap().len(), 1);
        assert!(store.entries(&b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_and_delete() {
        let store = TranscriptStore::new();
        let id = store.create_session().await;
        store.append(&id, TranscriptEntry::user("q", None)).await;

        store.clear(&id).await.unwrap();
        assert!(store.entries(&id).await.unwrap().is_empty());

        store.delete_session(&id).await.unwrap();
        assert!(matches!(
            store.entries(&id).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(store.delete_session(&id).await.is_err());
    }

    #[tokio::test]
    async fn list_sessions_reports_counts_and_preview() {
        let store = TranscriptStore::new();
        let id = store.create_session().await;
        store
            .append(&id, TranscriptEntry::user("什么是 Prompt Engineering？", Some("None")))
            .await;

        let sessions = store.list_sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].message_count, 1);
        assert_eq!(
            sessions[0].preview.as_deref(),
            Some("什么是 Prompt Engineering？")
        );
    }

    #[tokio::test]
    async fn turn_lock_serializes_a_session() {
        let store = TranscriptStore::new();
        let id = store.create_session().await;

        let guard = store.turn_lock(&id).await;
        let waiting = {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _turn = store.turn_lock(&id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        // Other sessions are not blocked.
        let other = store.create_session().await;
        drop(store.turn_lock(&other).await);

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
    }
}
