use serde::{Deserialize, Serialize};

use crate::core::config::settings::QianfanSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Qianfan takes the system prompt as a top-level field, not a message.
    pub system: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            system: None,
            temperature: None,
            top_p: None,
        }
    }

    /// A completion-style request: the whole prompt as one user message.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![ChatMessage::user(prompt)])
    }

    pub fn with_settings(mut self, settings: &QianfanSettings) -> Self {
        self.temperature = settings.temperature.or(self.temperature);
        self.top_p = settings.top_p.or(self.top_p);
        self
    }

    /// Text of the last user message, mostly useful for logging and tests.
    pub fn prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}
