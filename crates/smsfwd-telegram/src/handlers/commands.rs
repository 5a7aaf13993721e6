use std::sync::Arc;

use teloxide::prelude::*;

use smsfwd_core::{conversation::main_menu, messaging::types::Reply, messaging::types::TextMessage};

use crate::router::AppState;

use super::send_reply;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub async fn handle_command(msg: TextMessage, state: Arc<AppState>) -> ResponseResult<()> {
    let (cmd, _arg) = parse_command(&msg.text);

    let reply = match cmd.as_str() {
        "start" | "menu" => state.conversation.reset(msg.user_id).await,
        "help" => state.conversation.help(),
        "status" => state.conversation.show_config().await,
        _ => Reply::new("Unknown command. Send /menu to open the menu.", main_menu()),
    };

    send_reply(&state, msg.chat_id, &reply).await;
    Ok(())
}
