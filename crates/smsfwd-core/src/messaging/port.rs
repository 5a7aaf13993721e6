use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::Reply,
    Result,
};

/// Outbound side of the chat transport.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    /// Send an HTML message without touching the recipient's reply keyboard.
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef>;

    /// Send an operator-facing reply together with its keyboard.
    async fn send_reply(&self, chat_id: ChatId, reply: &Reply) -> Result<MessageRef>;
}

/// Resolves a public handle (`@channel`) to a numeric chat id.
#[async_trait]
pub trait ChatResolver: Send + Sync {
    async fn resolve_handle(&self, handle: &str) -> Result<ChatId>;
}
