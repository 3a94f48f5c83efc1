pub mod agent;
pub mod config;
pub mod kubernetes;
pub mod metrics;
pub mod repl;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes error: {0}")]
    Kubernetes(String),
    #[error("Inference error: {0}")]
    Inference(#[from] agent::provider::InferenceError),
    #[error("Conversation error: {0}")]
    Conversation(#[from] agent::conversation::ConversationError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
