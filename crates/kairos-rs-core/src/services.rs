//! Shared collaborators for the pipeline and the heartbeat.

use crate::chunking::chunk_message;
use crate::commands::{ApplyReport, DirectiveExecutor};
use crate::context::ContextBuilder;
use crate::directives::parse_reply;
use crate::error::KairosCoreError;
use chrono::Local;
use kairos_rs_protocol::{ChatMessage, ConversationId, Messenger, ModelClient, Role};
use kairos_rs_store::{HistoryRing, JobStore, MemoryStore};
use log::{debug, warn};
use std::sync::Arc;

/// Placeholder shown when a reply contained only directives.
pub const EMPTY_REPLY: &str = "...";

/// A model reply after directives were stripped and applied.
#[derive(Debug)]
pub struct Reply {
    pub visible: String,
    pub report: ApplyReport,
    pub parse_errors: usize,
}

/// Everything a unit of work needs: stores, collaborators, and prompt
/// assembly.
#[derive(Clone)]
pub struct Services {
    pub memory: MemoryStore,
    pub history: HistoryRing,
    pub jobs: JobStore,
    pub model: Arc<dyn ModelClient>,
    pub messenger: Arc<dyn Messenger>,
    pub executor: DirectiveExecutor,
    pub context: ContextBuilder,
    pub home_conversation_id: ConversationId,
    pub max_message_chars: usize,
    pub prompt_window: usize,
}

impl Services {
    /// Send `text` to a conversation, split to the messenger's size limit.
    pub async fn deliver(&self, conversation_id: &str, text: &str) -> Result<(), KairosCoreError> {
        let chunks = chunk_message(text, self.max_message_chars);
        debug!(
            "delivering reply (conversation={}, chunks={})",
            conversation_id,
            chunks.len()
        );
        for chunk in chunks {
            self.messenger.send_text(conversation_id, &chunk).await?;
        }
        Ok(())
    }

    /// Parse `raw`, apply its directives for `conversation_id`, and return the
    /// visible text.
    pub async fn digest(&self, raw: &str, conversation_id: &str) -> Reply {
        let parsed = parse_reply(raw);
        for error in &parsed.errors {
            warn!(
                "malformed directive (conversation={}, err={})",
                conversation_id, error
            );
        }
        let report = self
            .executor
            .apply(&parsed.directives, conversation_id)
            .await;
        let visible = if parsed.visible.is_empty() {
            EMPTY_REPLY.to_string()
        } else {
            parsed.visible
        };
        Reply {
            visible,
            report,
            parse_errors: parsed.errors.len(),
        }
    }

    /// Run one conversation turn: model call with the assembled context,
    /// directive application, and history append.
    ///
    /// The user turn is recorded only when `record_user` is set, so scheduled
    /// prompts do not appear as user speech.
    pub async fn respond(
        &self,
        conversation_id: &str,
        content: &str,
        record_user: bool,
    ) -> Result<Reply, KairosCoreError> {
        let history = self.history.recent(conversation_id, self.prompt_window)?;
        let messages = self
            .context
            .conversation_messages(&history, content, Local::now())?;
        let raw = self.model.complete(&messages).await?;
        let reply = self.digest(&raw, conversation_id).await;
        if record_user {
            self.history.append(conversation_id, Role::User, content)?;
        }
        self.history
            .append(conversation_id, Role::Assistant, &reply.visible)?;
        Ok(reply)
    }

    /// Single model call outside any conversation.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, KairosCoreError> {
        Ok(self.model.complete(messages).await?)
    }
}
