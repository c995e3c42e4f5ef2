use crate::ConversationId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message-received event from the chat transport, normalized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundEvent {
    pub conversation_id: ConversationId,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub is_bot: bool,
    /// Message type as reported by the transport (`text`, `image`, ...).
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub content: String,
}

fn default_kind() -> String {
    "text".to_string()
}

impl InboundEvent {
    /// Whether this is a text message that a human sent.
    pub fn is_human_text(&self) -> bool {
        !self.is_bot && self.kind == "text"
    }
}

/// A third-party webhook delivery, before conversion into a chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookTrigger {
    pub source: String,
    pub payload: Value,
}

impl WebhookTrigger {
    /// Render the synthetic inbound message text.
    ///
    /// Uses `payload.message` when it is a string, otherwise the pretty-printed
    /// payload.
    pub fn to_message(&self) -> String {
        let body = match self.payload.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => serde_json::to_string_pretty(&self.payload)
                .unwrap_or_else(|_| self.payload.to_string()),
        };
        let source = if self.source.trim().is_empty() {
            "external"
        } else {
            self.source.trim()
        };
        format!("From {source}: {body}")
    }
}
