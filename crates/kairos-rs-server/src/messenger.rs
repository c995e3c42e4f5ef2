//! HTTP client for the chat transport's bot API.

use async_trait::async_trait;
use kairos_rs_config::MessengerConfig;
use kairos_rs_protocol::{DeliveryError, Messenger};
use log::debug;
use reqwest::{Client, Response};
use serde_json::{Value, json};
use std::time::Duration;

/// `Messenger` backed by the transport's `/api/send-message` and typing
/// endpoints.
#[derive(Debug, Clone)]
pub struct HttpMessenger {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpMessenger {
    pub fn new(config: &MessengerConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<(), DeliveryError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| DeliveryError::Unavailable(err.to_string()))?;
        check_status(response).await
    }
}

#[async_trait]
impl Messenger for HttpMessenger {
    async fn send_text(&self, conversation_id: &str, content: &str) -> Result<(), DeliveryError> {
        debug!(
            "sending message (conversation={}, chars={})",
            conversation_id,
            content.chars().count()
        );
        let body = json!({
            "roomId": room_id(conversation_id),
            "content": content,
            "type": "text",
        });
        self.post("/api/send-message", body).await
    }

    async fn set_typing(&self, conversation_id: &str, typing: bool) -> Result<(), DeliveryError> {
        let path = if typing {
            "/api/typing"
        } else {
            "/api/stop-typing"
        };
        self.post(path, json!({ "roomId": room_id(conversation_id) }))
            .await
    }
}

/// Numeric conversation ids go out as JSON numbers.
pub(crate) fn room_id(conversation_id: &str) -> Value {
    match conversation_id.parse::<i64>() {
        Ok(id) => Value::from(id),
        Err(_) => Value::from(conversation_id),
    }
}

async fn check_status(response: Response) -> Result<(), DeliveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let message = response.text().await.unwrap_or_default();
    Err(DeliveryError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn numeric_room_ids_are_numbers() {
        assert_eq!(room_id("42"), json!(42));
        assert_eq!(room_id("general"), json!("general"));
    }
}
