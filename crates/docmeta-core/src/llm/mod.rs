mod client;
mod extraction;

pub use client::ChatClient;
pub use extraction::ExtractionClient;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Backend request failed: {0}")]
    Transport(String),
    #[error("Backend returned an error status: {0}")]
    Status(String),
    #[error("Backend returned no completion")]
    EmptyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One chat-completion style call: system instruction plus conversation
/// turns in, unstructured text out. Implementations are swappable so tests
/// can script replies.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, system: &str, messages: &[ChatMessage]) -> Result<String, LlmError>;
}
