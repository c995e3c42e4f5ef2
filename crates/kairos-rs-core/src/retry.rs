//! Exponential backoff for calls to the model and messenger endpoints.

use async_trait::async_trait;
use kairos_rs_config::RetryConfig;
use kairos_rs_protocol::{ChatMessage, DeliveryError, Messenger, ModelClient, ModelError};
use log::warn;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Attempt budget and base delay. Delay doubles after each failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// A policy that tries once.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Sleep before attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay())
    }
}

/// Run `op` until it succeeds, fails permanently, or the budget is spent.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && is_transient(&err) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "retrying {} (attempt={}, max_attempts={}, delay_ms={}, err={})",
                    label,
                    attempt,
                    policy.max_attempts,
                    delay.as_millis(),
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Model client wrapper that retries transient failures.
pub struct RetryingModel {
    inner: Arc<dyn ModelClient>,
    policy: RetryPolicy,
}

impl RetryingModel {
    pub fn new(inner: Arc<dyn ModelClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ModelClient for RetryingModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        retry(self.policy, "model completion", ModelError::is_transient, || {
            self.inner.complete(messages)
        })
        .await
    }
}

/// Messenger wrapper that retries sends. Typing indicators pass through.
pub struct RetryingMessenger {
    inner: Arc<dyn Messenger>,
    policy: RetryPolicy,
}

impl RetryingMessenger {
    pub fn new(inner: Arc<dyn Messenger>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Messenger for RetryingMessenger {
    async fn send_text(&self, conversation_id: &str, content: &str) -> Result<(), DeliveryError> {
        retry(self.policy, "message send", DeliveryError::is_transient, || {
            self.inner.send_text(conversation_id, content)
        })
        .await
    }

    async fn set_typing(&self, conversation_id: &str, typing: bool) -> Result<(), DeliveryError> {
        self.inner.set_typing(conversation_id, typing).await
    }
}
