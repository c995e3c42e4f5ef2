//! Inbound filtering and the per-batch conversation pipeline.

use crate::debounce::{BatchHandler, InboundMessage, MessageBatch};
use crate::error::KairosCoreError;
use crate::services::Services;
use async_trait::async_trait;
use kairos_rs_protocol::{ConversationId, InboundEvent};
use log::{debug, error, info, warn};

const MODEL_DOWN_REPLY: &str = "I can't reach my language model right now. Please try again in a moment.";
const FAILURE_REPLY: &str = "Something went wrong while I was replying. Please try again in a moment.";

/// Decides which transport events reach the debouncer.
#[derive(Debug, Clone)]
pub struct InboundFilter {
    home_conversation_id: ConversationId,
    bot_name: String,
    require_mention: bool,
}

impl InboundFilter {
    pub fn new(
        home_conversation_id: impl Into<ConversationId>,
        bot_name: impl Into<String>,
        require_mention: bool,
    ) -> Self {
        Self {
            home_conversation_id: home_conversation_id.into(),
            bot_name: bot_name.into(),
            require_mention,
        }
    }

    /// The conversation and message to buffer, or `None` when the event is
    /// dropped.
    ///
    /// Outside the home conversation a mention of the bot is required (when
    /// configured) and removed from the content.
    pub fn accept(&self, event: InboundEvent) -> Option<(ConversationId, InboundMessage)> {
        if !event.is_human_text() {
            debug!(
                "dropped inbound event (conversation={}, kind={}, is_bot={})",
                event.conversation_id, event.kind, event.is_bot
            );
            return None;
        }
        if !self.bot_name.is_empty() && event.sender_name == self.bot_name {
            debug!("dropped own message (conversation={})", event.conversation_id);
            return None;
        }
        let mut content = event.content.trim().to_string();
        if event.conversation_id != self.home_conversation_id && self.require_mention {
            let mention = format!("@{}", self.bot_name);
            match strip_mention(&content, &mention) {
                Some(stripped) => content = stripped,
                None => {
                    debug!(
                        "dropped message without mention (conversation={})",
                        event.conversation_id
                    );
                    return None;
                }
            }
        }
        if content.is_empty() {
            return None;
        }
        Some((
            event.conversation_id,
            InboundMessage {
                sender_id: event.sender_id,
                sender_name: event.sender_name,
                content,
            },
        ))
    }
}

/// Remove every ASCII-case-insensitive occurrence of `mention`, or `None`
/// when it does not occur.
fn strip_mention(content: &str, mention: &str) -> Option<String> {
    let lowered = content.to_ascii_lowercase();
    let needle = mention.to_ascii_lowercase();
    if needle.len() <= 1 || !lowered.contains(&needle) {
        return None;
    }
    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;
    while let Some(offset) = lowered[cursor..].find(&needle) {
        let start = cursor + offset;
        out.push_str(&content[cursor..start]);
        cursor = start + needle.len();
    }
    out.push_str(&content[cursor..]);
    Some(out.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Runs one debounced batch through the model and back to the messenger.
#[derive(Clone)]
pub struct MessagePipeline {
    services: Services,
}

impl MessagePipeline {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Process one batch. The typing indicator is cleared on every path and
    /// a failure produces a single error reply.
    pub async fn process(&self, batch: &MessageBatch) -> Result<(), KairosCoreError> {
        let conversation_id = batch.conversation_id.as_str();
        if let Err(err) = self.services.messenger.set_typing(conversation_id, true).await {
            warn!("failed to start typing (conversation={conversation_id}, err={err})");
        }

        let result = self.run(batch).await;
        if let Err(err) = &result {
            error!("pipeline failed (conversation={conversation_id}, err={err})");
            let notice = if err.is_model_unavailable() {
                MODEL_DOWN_REPLY
            } else {
                FAILURE_REPLY
            };
            if let Err(send_err) = self.services.messenger.send_text(conversation_id, notice).await {
                warn!(
                    "failed to send error reply (conversation={conversation_id}, err={send_err})"
                );
            }
        }

        if let Err(err) = self.services.messenger.set_typing(conversation_id, false).await {
            warn!("failed to stop typing (conversation={conversation_id}, err={err})");
        }
        result
    }

    async fn run(&self, batch: &MessageBatch) -> Result<(), KairosCoreError> {
        let reply = self
            .services
            .respond(&batch.conversation_id, &batch.content, true)
            .await?;
        info!(
            "replied (conversation={}, directives={}, failed={}, malformed={})",
            batch.conversation_id,
            reply.report.outcomes.len(),
            reply.report.failures().count(),
            reply.parse_errors
        );
        self.services
            .deliver(&batch.conversation_id, &reply.visible)
            .await
    }
}

#[async_trait]
impl BatchHandler for MessagePipeline {
    async fn handle(&self, batch: MessageBatch) {
        if let Err(err) = self.process(&batch).await {
            debug!(
                "batch finished with error (conversation={}, err={err})",
                batch.conversation_id
            );
        }
    }
}
