use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use super::mode::AnswerMode;
use super::prompts;
use crate::core::config::{ConfigService, Settings};
use crate::core::errors::ApiError;
use crate::llm::{ChatRequest, LlmProvider};
use crate::rag::{ChunkSearchResult, RagStore, Retriever};
use crate::transcript::{TranscriptEntry, TranscriptStore};

const EXCERPT_CHARS: usize = 200;

/// A retrieved chunk the answer was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub source: String,
    pub chunk_index: usize,
    pub score: f32,
    pub excerpt: String,
}

impl From<&ChunkSearchResult> for SourceRef {
    fn from(result: &ChunkSearchResult) -> Self {
        Self {
            source: result.chunk.source.clone(),
            chunk_index: result.chunk.chunk_index,
            score: result.score,
            excerpt: result.chunk.content.chars().take(EXCERPT_CHARS).collect(),
        }
    }
}

/// Outcome of one question/answer turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub session_id: String,
    pub mode: AnswerMode,
    pub question: String,
    /// Rephrased question used for retrieval in `chat_qa_chain` mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standalone_question: Option<String>,
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

/// The final LLM request of a turn plus what was retrieved for it.
struct PreparedAnswer {
    request: ChatRequest,
    standalone_question: Option<String>,
    sources: Vec<SourceRef>,
}

#[derive(Clone)]
pub struct ChatService {
    llm: Arc<dyn LlmProvider>,
    rag_store: Arc<dyn RagStore>,
    transcripts: TranscriptStore,
    config: ConfigService,
}

impl ChatService {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        rag_store: Arc<dyn RagStore>,
        transcripts: TranscriptStore,
        config: ConfigService,
    ) -> Self {
        Self {
            llm,
            rag_store,
            transcripts,
            config,
        }
    }

    /// Runs one turn and returns the full answer.
    pub async fn ask(
        &self,
        session_id: &str,
        mode: AnswerMode,
        question: &str,
    ) -> Result<ChatTurn, ApiError> {
        let question = validate_question(question)?;
        let _turn = self.transcripts.turn_lock(session_id).await;

        let prepared = self.begin_turn(session_id, mode, question).await?;
        let answer = self.llm.chat(prepared.request.clone()).await?;

        self.finish_turn(session_id, mode, question, prepared, answer).await
    }

    /// Same as [`ask`](Self::ask), but forwards answer fragments to
    /// `fragments` as they arrive. The transcript only receives the
    /// assistant entry once the stream has completed.
    pub async fn ask_streaming(
        &self,
        session_id: &str,
        mode: AnswerMode,
        question: &str,
        fragments: mpsc::UnboundedSender<String>,
    ) -> Result<ChatTurn, ApiError> {
        let question = validate_question(question)?;
        let _turn = self.transcripts.turn_lock(session_id).await;

        let prepared = self.begin_turn(session_id, mode, question).await?;
        let mut stream = self.llm.stream_chat(prepared.request.clone()).await?;

        let mut answer = String::new();
        while let Some(fragment) = stream.recv().await {
            let fragment = fragment?;
            if fragment.is_empty() {
                continue;
            }
            answer.push_str(&fragment);
            // The receiver going away does not cancel the turn.
            let _ = fragments.send(fragment);
        }

        self.finish_turn(session_id, mode, question, prepared, answer).await
    }

    /// Records the user entry and builds the final request. Must be called
    /// with the session's turn lock held.
    async fn begin_turn(
        &self,
        session_id: &str,
        mode: AnswerMode,
        question: &str,
    ) -> Result<PreparedAnswer, ApiError> {
        let settings = self.config.load_settings()?;
        let history = self
            .transcripts
            .entries(session_id)
            .await
            .unwrap_or_default();

        self.transcripts
            .append(session_id, TranscriptEntry::user(question, Some(mode.as_str())))
            .await;

        self.prepare(&settings, mode, question, &history).await
    }

    async fn finish_turn(
        &self,
        session_id: &str,
        mode: AnswerMode,
        question: &str,
        prepared: PreparedAnswer,
        answer: String,
    ) -> Result<ChatTurn, ApiError> {
        self.transcripts
            .append(
                session_id,
                TranscriptEntry::assistant(answer.clone(), Some(mode.as_str())),
            )
            .await;
        tracing::info!(
            "Answered in mode {} for session {} ({} sources)",
            mode.as_str(),
            session_id,
            prepared.sources.len()
        );

        Ok(ChatTurn {
            session_id: session_id.to_string(),
            mode,
            question: question.to_string(),
            standalone_question: prepared.standalone_question,
            answer,
            sources: prepared.sources,
        })
    }

    async fn prepare(
        &self,
        settings: &Settings,
        mode: AnswerMode,
        question: &str,
        history: &[TranscriptEntry],
    ) -> Result<PreparedAnswer, ApiError> {
        match mode {
            AnswerMode::Direct => Ok(PreparedAnswer {
                request: ChatRequest::from_prompt(question).with_settings(&settings.qianfan),
                standalone_question: None,
                sources: Vec::new(),
            }),
            AnswerMode::QaChain => {
                let results = self.retriever(settings).retrieve(question).await?;
                let prompt = prompts::qa_chain_prompt(&prompts::join_context(&results), question);
                Ok(PreparedAnswer {
                    request: ChatRequest::from_prompt(prompt).with_settings(&settings.qianfan),
                    standalone_question: None,
                    sources: results.iter().map(SourceRef::from).collect(),
                })
            }
            AnswerMode::ChatQaChain => {
                let recent = recent_history(history, settings.chat.history_limit);
                let standalone = if recent.is_empty() {
                    None
                } else {
                    let condense = prompts::condense_question_prompt(
                        &prompts::format_history(recent),
                        question,
                    );
                    let rephrased = self
                        .llm
                        .chat(ChatRequest::from_prompt(condense).with_settings(&settings.qianfan))
                        .await?;
                    let rephrased = rephrased.trim().to_string();
                    tracing::debug!("Condensed follow-up question to: {}", rephrased);
                    (!rephrased.is_empty()).then_some(rephrased)
                };

                let retrieval_question = standalone.as_deref().unwrap_or(question);
                let results = self.retriever(settings).retrieve(retrieval_question).await?;
                let prompt = prompts::context_qa_prompt(
                    &prompts::join_context(&results),
                    retrieval_question,
                );
                Ok(PreparedAnswer {
                    request: ChatRequest::from_prompt(prompt).with_settings(&settings.qianfan),
                    standalone_question: standalone,
                    sources: results.iter().map(SourceRef::from).collect(),
                })
            }
        }
    }

    fn retriever(&self, settings: &Settings) -> Retriever {
        Retriever::new(
            self.llm.clone(),
            self.rag_store.clone(),
            settings.retrieval.top_k,
            settings.qianfan.embedding_endpoint.clone(),
        )
    }
}

/// Trimmed question, or `BadRequest` when it is blank.
pub fn validate_question(question: &str) -> Result<&str, ApiError> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest("Message must not be empty".to_string()));
    }
    Ok(trimmed)
}

fn recent_history(history: &[TranscriptEntry], limit: usize) -> &[TranscriptEntry] {
    if limit == 0 || history.len() <= limit {
        history
    } else {
        &history[history.len() - limit..]
    }
}
