use async_trait::async_trait;
use kairos_rs_protocol::{DeliveryError, Messenger};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Messenger that records sends and typing changes.
///
/// `fail_next_sends(n)` makes the next `n` sends fail with a transient error.
#[derive(Debug, Clone, Default)]
pub struct RecordingMessenger {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    typing: Arc<Mutex<Vec<(String, bool)>>>,
    failures: Arc<AtomicUsize>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_sends(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// `(conversation, content)` pairs in send order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    /// Contents sent to one conversation.
    pub fn sent_to(&self, conversation_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(conversation, _)| conversation == conversation_id)
            .map(|(_, content)| content.clone())
            .collect()
    }

    pub fn typing_events(&self) -> Vec<(String, bool)> {
        self.typing.lock().clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, conversation_id: &str, content: &str) -> Result<(), DeliveryError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DeliveryError::Unavailable("scripted failure".to_string()));
        }
        self.sent
            .lock()
            .push((conversation_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn set_typing(&self, conversation_id: &str, typing: bool) -> Result<(), DeliveryError> {
        self.typing
            .lock()
            .push((conversation_id.to_string(), typing));
        Ok(())
    }
}
