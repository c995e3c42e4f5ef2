//! Shared types for Kairos: chat messages, inbound events, heartbeat actions,
//! and the collaborator traits (model backend, messenger, notifier).

mod action;
mod collaborator;
mod event;
mod message;

pub use action::HeartbeatAction;
pub use collaborator::{DeliveryError, Messenger, ModelClient, ModelError, Notifier};
pub use event::{InboundEvent, WebhookTrigger};
pub use message::{ChatMessage, Role};

/// Identifier of an addressable chat context (a messenger room).
pub type ConversationId = String;
