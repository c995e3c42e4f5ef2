//! OpenAI-compatible chat-completions client.

use async_trait::async_trait;
use kairos_rs_config::ModelConfig;
use kairos_rs_protocol::{ChatMessage, ModelClient, ModelError};
use log::{debug, warn};
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpModelClient {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpModelClient {
    pub fn new(config: &ModelConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: format!(
                "{}/v1/chat/completions",
                config.base_url.trim_end_matches('/')
            ),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
        })
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
        });
        debug!(
            "calling model (url={}, messages={})",
            self.url,
            messages.len()
        );
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = self.api_key.as_ref() {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|err| {
            warn!("model request failed (url={}, err={})", self.url, err);
            ModelError::Unavailable(err.to_string())
        })?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        let json: Value = response
            .json()
            .await
            .map_err(|err| ModelError::InvalidResponse(err.to_string()))?;
        parse_completion(&json)
    }
}

fn parse_completion(json: &Value) -> Result<String, ModelError> {
    json.get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ModelError::InvalidResponse(format!("unexpected response shape: {json}")))
}
