//! Inbound WhatsApp webhook: verification handshake and message delivery.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::conversation::{ConversationCore, Outcome};
use crate::conversation::model::{InboundMessage, MessageKind};

/// Shared state for webhook handlers.
#[derive(Clone)]
pub struct WebhookState {
    pub core: Arc<ConversationCore>,
    pub verify_token: SecretString,
}

// ── Payload ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Default, Deserialize)]
struct Change {
    #[serde(default)]
    value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    from: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<WireText>,
}

#[derive(Debug, Deserialize)]
struct WireText {
    #[serde(default)]
    body: String,
}

impl From<WireMessage> for InboundMessage {
    fn from(msg: WireMessage) -> Self {
        let kind = if msg.kind == "text" {
            MessageKind::Text
        } else {
            MessageKind::Other
        };
        Self {
            id: msg.id,
            sender: msg.from,
            body: msg.text.map(|t| t.body).unwrap_or_default(),
            kind,
        }
    }
}

/// Flatten every entry and change of a webhook body into one batch.
///
/// Status-only deliveries (no `messages`) yield an empty batch.
pub fn parse_inbound(body: &[u8]) -> Result<Vec<InboundMessage>, serde_json::Error> {
    let payload: WebhookPayload = serde_json::from_slice(body)?;
    Ok(payload
        .entry
        .into_iter()
        .flat_map(|entry| entry.changes)
        .flat_map(|change| change.value.messages)
        .map(InboundMessage::from)
        .collect())
}

// ── Handlers ────────────────────────────────────────────────────────────

/// GET /webhook: echo `hub.challenge` when the token matches.
async fn verify(
    State(state): State<WebhookState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    if mode == Some("subscribe") && token == Some(state.verify_token.expose_secret()) {
        info!("Webhook verified");
        (StatusCode::OK, challenge).into_response()
    } else {
        warn!("Webhook verification failed");
        StatusCode::FORBIDDEN.into_response()
    }
}

/// POST /webhook: acknowledge at once and handle the batch in the
/// background, so slow model calls never make the upstream redeliver.
async fn receive(State(state): State<WebhookState>, body: Bytes) -> StatusCode {
    let messages = match parse_inbound(&body) {
        Ok(messages) => messages,
        Err(e) => {
            warn!(error = %e, "Ignoring unparseable webhook payload");
            return StatusCode::OK;
        }
    };
    if messages.is_empty() {
        debug!("Webhook delivery without messages");
        return StatusCode::OK;
    }

    let core = Arc::clone(&state.core);
    tokio::spawn(async move {
        let reports = core.handle_batch(messages).await;
        let unsent = reports
            .iter()
            .filter(|r| {
                !r.reply_sent && !matches!(r.outcome, Outcome::Skipped(_) | Outcome::Duplicate)
            })
            .count();
        info!(handled = reports.len(), unsent, "Webhook batch done");
    });
    StatusCode::OK
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "meal-assist"
    }))
}

/// Build the webhook and health routes.
pub fn webhook_routes(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", get(verify).post(receive))
        .route("/health", get(health))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cloud_api_envelope() {
        let body = serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "WABA",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "messages": [
                            {"id": "wamid.1", "from": "919800000001", "type": "text", "text": {"body": "I had poha"}},
                            {"id": "wamid.2", "from": "919800000002", "type": "image", "image": {"id": "img"}}
                        ]
                    }
                }, {
                    "field": "messages",
                    "value": {"messages": [
                        {"id": "wamid.3", "from": "919800000001", "type": "text", "text": {"body": "lunch"}}
                    ]}
                }]
            }]
        });

        let messages = parse_inbound(body.to_string().as_bytes()).unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], InboundMessage::text("wamid.1", "919800000001", "I had poha"));
        assert_eq!(messages[1].kind, MessageKind::Other);
        assert_eq!(messages[1].body, "");
        assert_eq!(messages[2].body, "lunch");
    }

    #[test]
    fn status_updates_have_no_messages() {
        let body = r#"{"entry":[{"changes":[{"value":{"statuses":[{"id":"wamid.1","status":"read"}]}}]}]}"#;
        assert!(parse_inbound(body.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_inbound(b"not json").is_err());
    }
}
