use async_trait::async_trait;
use kairos_rs_protocol::{ChatMessage, ModelClient, ModelError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum ScriptedReply {
    Text(String),
    Unavailable(String),
}

/// Model that answers from a queue, then falls back to a fixed reply.
/// Every request is recorded.
#[derive(Debug, Clone)]
pub struct ScriptedModel {
    replies: Arc<Mutex<VecDeque<ScriptedReply>>>,
    fallback: String,
    requests: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl ScriptedModel {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            fallback: fallback.into(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let model = Self::new(r#"{"action": "none"}"#);
        for reply in replies {
            model.push_reply(reply);
        }
        model
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .push_back(ScriptedReply::Text(reply.into()));
    }

    /// Queue an `Unavailable` failure.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.replies
            .lock()
            .push_back(ScriptedReply::Unavailable(message.into()));
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        self.requests.lock().push(messages.to_vec());
        match self.replies.lock().pop_front() {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Unavailable(message)) => Err(ModelError::Unavailable(message)),
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Model with one fixed reply that exposes its requests through a shared sink.
#[derive(Debug, Clone)]
pub struct RecordingModel {
    response: String,
    seen: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl RecordingModel {
    pub fn new(response: impl Into<String>) -> (Self, Arc<Mutex<Vec<Vec<ChatMessage>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                response: response.into(),
                seen: seen.clone(),
            },
            seen,
        )
    }
}

#[async_trait]
impl ModelClient for RecordingModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        self.seen.lock().push(messages.to_vec());
        Ok(self.response.clone())
    }
}

/// Model that always fails, transiently unless built with [`FailingModel::rejecting`].
#[derive(Debug, Clone, Default)]
pub struct FailingModel {
    status: Option<u16>,
    calls: Arc<Mutex<usize>>,
}

impl FailingModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with a rejection carrying `status`.
    pub fn rejecting(status: u16) -> Self {
        Self {
            status: Some(status),
            calls: Arc::default(),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl ModelClient for FailingModel {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, ModelError> {
        *self.calls.lock() += 1;
        Err(match self.status {
            Some(status) => ModelError::Rejected {
                status,
                message: "rejected".to_string(),
            },
            None => ModelError::Unavailable("connection refused".to_string()),
        })
    }
}
