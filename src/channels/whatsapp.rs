//! WhatsApp Cloud API sender.
//!
//! Posts text messages to the Graph API `/{phone_number_id}/messages`
//! endpoint, splitting long texts into several messages.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::channels::MessageSender;
use crate::error::ChannelError;

/// Maximum text body length accepted by the messages endpoint.
const WHATSAPP_MAX_MESSAGE_LENGTH: usize = 4096;

/// Credentials and endpoint for the Graph API.
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub access_token: SecretString,
    pub phone_number_id: String,
    /// e.g. `https://graph.facebook.com/v19.0`
    pub api_base: String,
}

pub struct WhatsAppSender {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppSender {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/messages",
            self.config.api_base.trim_end_matches('/'),
            self.config.phone_number_id
        )
    }

    async fn send_chunk(&self, recipient: &str, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": recipient,
            "type": "text",
            "text": { "body": text },
        });

        let resp = self
            .client
            .post(self.messages_url())
            .bearer_auth(self.config.access_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "whatsapp".into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = resp.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(ChannelError::AuthFailed {
                name: "whatsapp".into(),
                reason: detail,
            }),
            429 => Err(ChannelError::RateLimited {
                name: "whatsapp".into(),
            }),
            _ => Err(ChannelError::SendFailed {
                name: "whatsapp".into(),
                reason: format!("{status}: {detail}"),
            }),
        }
    }
}

#[async_trait]
impl MessageSender for WhatsAppSender {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn send(&self, recipient: &str, text: &str) -> Result<(), ChannelError> {
        let chunks = split_message(text, WHATSAPP_MAX_MESSAGE_LENGTH);
        for chunk in &chunks {
            self.send_chunk(recipient, chunk).await?;
        }
        tracing::info!(recipient, chunks = chunks.len(), "WhatsApp message sent");
        Ok(())
    }
}

/// Split a message into chunks of at most `max_len` bytes, preferring
/// newline then space boundaries. Never splits inside a UTF-8 character.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        // A limit narrower than the first character still takes it whole.
        if limit == 0 {
            limit = remaining.chars().next().map_or(1, char::len_utf8);
        }
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Splitting at 0 would never make progress.
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}
