//! Interfaces to the external collaborators: the language-model backend, the
//! chat transport, and desktop notification delivery.

use crate::message::ChatMessage;
use async_trait::async_trait;

/// Errors returned by a model backend.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The endpoint was unreachable or timed out.
    #[error("model unavailable: {0}")]
    Unavailable(String),
    /// The endpoint answered with a non-success status.
    #[error("model rejected request (status={status}): {message}")]
    Rejected { status: u16, message: String },
    /// The endpoint answered but the body could not be understood.
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Unavailable(_) => true,
            ModelError::Rejected { status, .. } => *status == 429 || *status >= 500,
            ModelError::InvalidResponse(_) => false,
        }
    }
}

/// Errors returned by outbound delivery (messenger or notifier).
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The endpoint was unreachable or timed out.
    #[error("delivery endpoint unavailable: {0}")]
    Unavailable(String),
    /// The endpoint refused the request.
    #[error("delivery rejected (status={status}): {message}")]
    Rejected { status: u16, message: String },
}

impl DeliveryError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DeliveryError::Unavailable(_) => true,
            DeliveryError::Rejected { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// Text-completion backend consumed as a black box.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Complete an ordered list of role-tagged messages into one reply.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;
}

/// Chat transport used to reach users.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send one text message to a conversation.
    async fn send_text(&self, conversation_id: &str, content: &str) -> Result<(), DeliveryError>;

    /// Set or clear the typing indicator for a conversation.
    async fn set_typing(&self, conversation_id: &str, typing: bool) -> Result<(), DeliveryError>;
}

/// Desktop (or other out-of-band) notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, message: &str) -> Result<(), DeliveryError>;
}
