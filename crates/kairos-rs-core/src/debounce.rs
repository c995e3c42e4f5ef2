//! Collapses bursts of inbound messages into one unit of work per
//! conversation.
//!
//! The first message of a burst starts a fixed window; later messages join
//! the buffer without extending it. When the window closes the buffer is
//! handed to the [`BatchHandler`] exactly once. Batches of one conversation
//! run one after another; different conversations never wait on each other.

use async_trait::async_trait;
use kairos_rs_protocol::ConversationId;
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

/// One accepted inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
}

impl InboundMessage {
    pub fn new(sender_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            sender_name: String::new(),
            content: content.into(),
        }
    }
}

/// Messages collected during one window, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBatch {
    pub conversation_id: ConversationId,
    pub sender_ids: Vec<String>,
    /// Contents joined with `\n`.
    pub content: String,
}

impl MessageBatch {
    fn from_messages(conversation_id: ConversationId, messages: Vec<InboundMessage>) -> Self {
        let mut sender_ids = Vec::new();
        let mut contents = Vec::with_capacity(messages.len());
        for message in messages {
            if !sender_ids.contains(&message.sender_id) {
                sender_ids.push(message.sender_id);
            }
            contents.push(message.content);
        }
        Self {
            conversation_id,
            sender_ids,
            content: contents.join("\n"),
        }
    }
}

/// Downstream processing for a closed window.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, batch: MessageBatch);
}

struct DebouncerInner {
    window: Duration,
    handler: Arc<dyn BatchHandler>,
    pending: Mutex<HashMap<ConversationId, Vec<InboundMessage>>>,
    lanes: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Per-conversation fixed-window debouncer.
#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<DebouncerInner>,
}

impl Debouncer {
    pub fn new(window: Duration, handler: Arc<dyn BatchHandler>) -> Self {
        Self {
            inner: Arc::new(DebouncerInner {
                window,
                handler,
                pending: Mutex::new(HashMap::new()),
                lanes: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Buffer `message`, starting the window if none is open for the
    /// conversation. Must be called from within a tokio runtime.
    pub fn push(&self, conversation_id: &str, message: InboundMessage) {
        let mut pending = self.inner.pending.lock();
        match pending.entry(conversation_id.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().push(message);
                debug!(
                    "buffered message (conversation={}, buffered={})",
                    conversation_id,
                    entry.get().len()
                );
            }
            Entry::Vacant(entry) => {
                entry.insert(vec![message]);
                debug!("opened debounce window (conversation={conversation_id})");
                let inner = self.inner.clone();
                let conversation_id = conversation_id.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(inner.window).await;
                    inner.flush(conversation_id).await;
                });
            }
        }
    }

    /// Number of conversations with an open window.
    pub fn open_windows(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

impl DebouncerInner {
    async fn flush(&self, conversation_id: ConversationId) {
        let Some(messages) = self.pending.lock().remove(&conversation_id) else {
            return;
        };
        let lane = self
            .lanes
            .lock()
            .entry(conversation_id.clone())
            .or_default()
            .clone();
        let guard = lane.lock().await;
        info!(
            "dispatching batch (conversation={}, messages={})",
            conversation_id,
            messages.len()
        );
        let batch = MessageBatch::from_messages(conversation_id.clone(), messages);
        self.handler.handle(batch).await;
        drop(guard);

        // Only the map and this task hold the lane when nobody is queued.
        let mut lanes = self.lanes.lock();
        if Arc::strong_count(&lane) == 2 {
            lanes.remove(&conversation_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<MessageBatch>>,
        delay: Duration,
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BatchHandler for Recorder {
        async fn handle(&self, batch: MessageBatch) {
            self.log.lock().push(format!("start {}", batch.content));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.log.lock().push(format!("end {}", batch.content));
            self.batches.lock().push(batch);
        }
    }

    fn msg(content: &str) -> InboundMessage {
        InboundMessage::new("u1", content)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_within_window_is_one_batch() {
        let recorder = Arc::new(Recorder::default());
        let debouncer = Debouncer::new(Duration::from_millis(1500), recorder.clone());
        for i in 1..=5 {
            debouncer.push("room", msg(&format!("m{i}")));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(debouncer.open_windows(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let batches = recorder.batches.lock().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].content, "m1\nm2\nm3\nm4\nm5");
        assert_eq!(batches[0].sender_ids, vec!["u1"]);
        assert_eq!(debouncer.open_windows(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn window_is_fixed_not_sliding() {
        let recorder = Arc::new(Recorder::default());
        let debouncer = Debouncer::new(Duration::from_millis(1500), recorder.clone());
        debouncer.push("room", msg("a"));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        debouncer.push("room", msg("b"));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        debouncer.push("room", msg("c"));
        tokio::time::sleep(Duration::from_secs(3)).await;

        let contents: Vec<String> = recorder
            .batches
            .lock()
            .iter()
            .map(|batch| batch.content.clone())
            .collect();
        assert_eq!(contents, vec!["a\nb", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_beyond_window_are_separate_batches() {
        let recorder = Arc::new(Recorder::default());
        let debouncer = Debouncer::new(Duration::from_millis(1500), recorder.clone());
        debouncer.push("room", msg("first"));
        tokio::time::sleep(Duration::from_secs(5)).await;
        debouncer.push("room", msg("second"));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(recorder.batches.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn conversations_are_independent() {
        let recorder = Arc::new(Recorder::default());
        let debouncer = Debouncer::new(Duration::from_millis(1500), recorder.clone());
        debouncer.push("a", msg("a1"));
        debouncer.push("b", msg("b1"));
        debouncer.push("a", msg("a2"));
        tokio::time::sleep(Duration::from_secs(2)).await;

        let mut batches = recorder.batches.lock().clone();
        batches.sort_by(|x, y| x.conversation_id.cmp(&y.conversation_id));
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].content, "a1\na2");
        assert_eq!(batches[1].content, "b1");
    }

    #[tokio::test(start_paused = true)]
    async fn batches_of_one_conversation_never_overlap() {
        let recorder = Arc::new(Recorder {
            delay: Duration::from_secs(10),
            ..Recorder::default()
        });
        let debouncer = Debouncer::new(Duration::from_millis(1500), recorder.clone());
        debouncer.push("room", msg("one"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        debouncer.push("room", msg("two"));
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(
            recorder.log.lock().clone(),
            vec!["start one", "end one", "start two", "end two"]
        );
        assert!(debouncer.inner.lanes.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_conversations_release_their_lane() {
        let recorder = Arc::new(Recorder::default());
        let debouncer = Debouncer::new(Duration::from_millis(1500), recorder.clone());
        for room in ["a", "b", "c"] {
            debouncer.push(room, msg("hi"));
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(recorder.batches.lock().len(), 3);
        assert!(debouncer.inner.lanes.lock().is_empty());
    }
}
