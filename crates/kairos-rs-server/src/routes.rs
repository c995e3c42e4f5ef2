//! Webhook endpoints: messenger events, third-party triggers, and health.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use kairos_rs_core::{Debouncer, InboundFilter, InboundMessage};
use kairos_rs_protocol::{ConversationId, InboundEvent, WebhookTrigger};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header carrying the shared secret for third-party webhooks.
pub const SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Clone)]
pub struct AppState {
    pub debouncer: Debouncer,
    pub filter: InboundFilter,
    pub home_conversation_id: ConversationId,
    pub secret: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(messenger_event))
        .route("/webhook/incoming/{*source}", post(incoming))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    fn ok() -> Json<Self> {
        Json(Self {
            ok: true,
            error: None,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct MessengerEnvelope {
    #[serde(default)]
    event: String,
    #[serde(rename = "roomId", default)]
    room_id: Value,
    #[serde(default)]
    data: MessengerData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessengerData {
    #[serde(default)]
    content: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    sender_id: Value,
    #[serde(default)]
    sender_name: String,
    #[serde(default)]
    is_bot: bool,
}

impl MessengerEnvelope {
    fn into_event(self) -> InboundEvent {
        InboundEvent {
            conversation_id: id_string(&self.room_id),
            sender_id: id_string(&self.data.sender_id),
            sender_name: self.data.sender_name,
            is_bot: self.data.is_bot,
            kind: self.data.kind,
            content: self.data.content,
        }
    }
}

/// Transport ids arrive as numbers or strings.
fn id_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn messenger_event(State(state): State<AppState>, body: Bytes) -> Json<Ack> {
    let envelope: MessengerEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!("ignored malformed messenger event (err={err})");
            return Ack::ok();
        }
    };
    if envelope.event != "new_message" {
        debug!("ignored messenger event (event={})", envelope.event);
        return Ack::ok();
    }
    if let Some((conversation_id, message)) = state.filter.accept(envelope.into_event()) {
        state.debouncer.push(&conversation_id, message);
    }
    Ack::ok()
}

async fn incoming(
    State(state): State<AppState>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Ack>) {
    if let Some(expected) = state.secret.as_deref().filter(|secret| !secret.is_empty()) {
        let provided = headers
            .get(SECRET_HEADER)
            .and_then(|value| value.to_str().ok());
        if provided != Some(expected) {
            warn!("rejected webhook with bad secret (source={source})");
            return (
                StatusCode::UNAUTHORIZED,
                Json(Ack {
                    ok: false,
                    error: Some("unauthorized".to_string()),
                }),
            );
        }
    }

    let payload = serde_json::from_slice::<Value>(&body)
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
    let trigger = WebhookTrigger {
        source: source.clone(),
        payload,
    };
    info!("accepted webhook (source={source})");
    state.debouncer.push(
        &state.home_conversation_id,
        InboundMessage {
            sender_id: format!("webhook:{source}"),
            sender_name: source,
            content: trigger.to_message(),
        },
    );
    (StatusCode::OK, Ack::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn envelope_maps_numeric_ids() {
        let envelope: MessengerEnvelope = serde_json::from_value(json!({
            "event": "new_message",
            "roomId": 7,
            "data": {
                "content": "hi",
                "type": "text",
                "senderId": 3,
                "senderName": "Lee",
                "isBot": false
            }
        }))
        .expect("envelope");
        let event = envelope.into_event();
        assert_eq!(event.conversation_id, "7");
        assert_eq!(event.sender_id, "3");
        assert_eq!(event.sender_name, "Lee");
        assert!(event.is_human_text());
    }
}
