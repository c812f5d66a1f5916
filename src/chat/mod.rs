mod mode;
pub mod prompts;
mod service;

pub use mode::AnswerMode;
pub use service::{validate_question, ChatService, ChatTurn, SourceRef};
