//! Telegram update handlers.
//!
//! Each handler is a small adapter that:
//! - checks the sender against the admin allow-list
//! - turns the Telegram message into a core `TextMessage`
//! - feeds it to the core conversation and sends back the reply

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use smsfwd_core::{
    domain::{ChatId, UserId},
    messaging::types::{Reply, TextMessage},
    security::{is_authorized, UNAUTHORIZED_MESSAGE},
};

use crate::router::AppState;
mod commands;
mod text;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));

    if !is_authorized(user_id, &state.cfg.admin_user_ids) {
        tracing::warn!(user_id = ?user_id.map(|u| u.0), chat_id = msg.chat.id.0, "unauthorized sender");
        let _ = bot.send_message(msg.chat.id, UNAUTHORIZED_MESSAGE).await;
        return Ok(());
    }

    let Some(incoming) = text_message(&msg) else {
        // Only text drives the menu; stickers, photos and the like are ignored.
        return Ok(());
    };

    // One operator turn at a time per chat.
    let _guard = state.chat_locks.lock_chat(incoming.chat_id.0).await;

    if incoming.text.starts_with('/') {
        return commands::handle_command(incoming, state.clone()).await;
    }
    text::handle_text(incoming, state.clone()).await
}

fn text_message(msg: &Message) -> Option<TextMessage> {
    let user = msg.from()?;
    let text = msg.text()?;
    Some(TextMessage {
        chat_id: ChatId(msg.chat.id.0),
        user_id: UserId(user.id.0 as i64),
        username: user.username.clone(),
        text: text.to_string(),
    })
}

async fn send_reply(state: &AppState, chat_id: ChatId, reply: &Reply) {
    if let Err(e) = state.messenger.send_reply(chat_id, reply).await {
        tracing::warn!(chat_id = chat_id.0, error = %e, "failed to send reply");
    }
}
