use std::sync::Arc;

use teloxide::prelude::*;

use smsfwd_core::messaging::types::TextMessage;

use crate::router::AppState;

use super::send_reply;

pub async fn handle_text(msg: TextMessage, state: Arc<AppState>) -> ResponseResult<()> {
    tracing::debug!(
        user_id = msg.user_id.0,
        username = msg.username.as_deref().unwrap_or("unknown"),
        "operator input"
    );

    let reply = state.conversation.handle_text(msg.user_id, &msg.text).await;
    send_reply(&state, msg.chat_id, &reply).await;
    Ok(())
}
