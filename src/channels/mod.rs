//! Channel abstraction for outbound delivery, plus the WhatsApp transport
//! and its inbound webhook.

pub mod webhook;
pub mod whatsapp;

pub use webhook::{WebhookState, webhook_routes};
pub use whatsapp::{WhatsAppConfig, WhatsAppSender};

use async_trait::async_trait;

use crate::error::ChannelError;

/// Delivers text to a recipient. Chunking is the sender's concern.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Channel name for logs.
    fn name(&self) -> &str;

    async fn send(&self, recipient: &str, text: &str) -> Result<(), ChannelError>;
}
