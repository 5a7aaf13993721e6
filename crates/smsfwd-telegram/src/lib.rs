//! Telegram adapter (teloxide).
//!
//! This crate implements the `smsfwd-core` messaging and chat-resolver ports
//! over the Telegram Bot API and drives the update dispatcher.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{KeyboardButton, KeyboardMarkup, ParseMode, Recipient, ReplyMarkup},
};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use smsfwd_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::{ChatResolver, MessagingPort},
        types::{Reply, ReplyKeyboard},
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }
}

/// Retries on `RetryAfter` for operator replies and lookups.
const REPLY_RETRIES: usize = 1;
/// Forwarded SMS get exactly one delivery attempt.
const FORWARD_RETRIES: usize = 0;

fn map_err(e: teloxide::RequestError) -> Error {
    Error::External(format!("telegram error: {e}"))
}

async fn with_retry<T, Fut>(max_retries: usize, mut op: impl FnMut() -> Fut) -> Result<T>
where
    Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
    Fut::IntoFuture: Send,
{
    let mut attempts = 0usize;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => match e {
                teloxide::RequestError::RetryAfter(d) if attempts < max_retries => {
                    attempts += 1;
                    sleep(d).await;
                    continue;
                }
                other => return Err(map_err(other)),
            },
        }
    }
}

pub(crate) fn keyboard_markup(keyboard: &ReplyKeyboard) -> KeyboardMarkup {
    let rows: Vec<Vec<KeyboardButton>> = keyboard
        .rows
        .iter()
        .map(|row| row.iter().map(|label| KeyboardButton::new(label.clone())).collect())
        .collect();
    KeyboardMarkup::new(rows).resize_keyboard(true)
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        let msg = with_retry(FORWARD_RETRIES, || {
            self.bot
                .send_message(Self::tg_chat(chat_id), html.to_string())
                .parse_mode(ParseMode::Html)
                .disable_web_page_preview(true)
        })
        .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn send_reply(&self, chat_id: ChatId, reply: &Reply) -> Result<MessageRef> {
        let markup = ReplyMarkup::Keyboard(keyboard_markup(&reply.keyboard));

        let msg = with_retry(REPLY_RETRIES, || {
            self.bot
                .send_message(Self::tg_chat(chat_id), reply.html.clone())
                .parse_mode(ParseMode::Html)
                .reply_markup(markup.clone())
        })
        .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }
}

#[async_trait]
impl ChatResolver for TelegramMessenger {
    async fn resolve_handle(&self, handle: &str) -> Result<ChatId> {
        let chat = with_retry(REPLY_RETRIES, || {
            self.bot
                .get_chat(Recipient::ChannelUsername(handle.to_string()))
        })
        .await?;
        Ok(ChatId(chat.id.0))
    }
}
