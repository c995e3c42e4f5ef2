use serde::{Deserialize, Serialize};

/// The single action a heartbeat decision may request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum HeartbeatAction {
    /// Do nothing this tick.
    None,
    /// Send a message to the home conversation.
    Message { content: String },
    /// Run a background task and report the result.
    Task { content: String },
    /// Create a scheduled job targeting the home conversation.
    Schedule {
        name: String,
        prompt: String,
        #[serde(default)]
        cron: Option<String>,
        #[serde(default, alias = "once_at", alias = "onceAt")]
        at: Option<String>,
    },
}

impl HeartbeatAction {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            HeartbeatAction::None => "none",
            HeartbeatAction::Message { .. } => "message",
            HeartbeatAction::Task { .. } => "task",
            HeartbeatAction::Schedule { .. } => "schedule",
        }
    }
}
