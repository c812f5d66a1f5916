pub mod credentials;
pub mod provider;
pub mod qianfan;
pub mod testing;
pub mod types;

pub use credentials::{CredentialSource, CredentialStore, Credentials};
pub use provider::LlmProvider;
pub use qianfan::QianfanProvider;
pub use types::{ChatMessage, ChatRequest};
