//! Operator conversation: reply-keyboard menu plus one pending action per operator.
//!
//! An operator is either at the menu root (no entry in the session table) or
//! awaiting free-text input for a [`PendingAction`]. Every config change goes
//! through [`ConfigStore`], so the poller always sees whole snapshots.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::{
    domain::{ChatId, UserId},
    errors::Error,
    filter::parse_keywords,
    formatting::{code, escape_html},
    messaging::{
        port::ChatResolver,
        types::{Reply, ReplyKeyboard},
    },
    scheduler::{PollScheduler, SchedulerState},
    store::{ConfigPatch, ConfigStore, ForwardConfig},
    Result,
};

/// Prefix that marks a destination as a public handle rather than a numeric id.
pub const HANDLE_MARKER: char = '@';

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MenuCommand {
    AddToken,
    SwitchToken,
    DeleteToken,
    SetDestination,
    SetKeywords,
    StartForwarding,
    StopForwarding,
    ShowConfig,
    BackToMenu,
}

impl MenuCommand {
    pub const ALL: [MenuCommand; 9] = [
        MenuCommand::AddToken,
        MenuCommand::SwitchToken,
        MenuCommand::DeleteToken,
        MenuCommand::SetDestination,
        MenuCommand::SetKeywords,
        MenuCommand::StartForwarding,
        MenuCommand::StopForwarding,
        MenuCommand::ShowConfig,
        MenuCommand::BackToMenu,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MenuCommand::AddToken => "➕ Add SMS token",
            MenuCommand::SwitchToken => "🔄 Switch SMS token",
            MenuCommand::DeleteToken => "🗑 Delete SMS token",
            MenuCommand::SetDestination => "🎯 Set destination",
            MenuCommand::SetKeywords => "🔑 Set keywords",
            MenuCommand::StartForwarding => "▶️ Start forwarding",
            MenuCommand::StopForwarding => "⏹ Stop forwarding",
            MenuCommand::ShowConfig => "ℹ️ Show config",
            MenuCommand::BackToMenu => "⬅️ Back to menu",
        }
    }

    pub fn from_label(text: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == text)
    }
}

const MAIN_MENU: &[&[MenuCommand]] = &[
    &[MenuCommand::AddToken, MenuCommand::SwitchToken],
    &[MenuCommand::DeleteToken],
    &[MenuCommand::SetDestination, MenuCommand::SetKeywords],
    &[MenuCommand::StartForwarding, MenuCommand::StopForwarding],
    &[MenuCommand::ShowConfig],
];

pub fn main_menu() -> ReplyKeyboard {
    ReplyKeyboard::new(
        MAIN_MENU
            .iter()
            .map(|row| row.iter().map(|c| c.label().to_string()).collect())
            .collect(),
    )
}

pub fn back_only() -> ReplyKeyboard {
    ReplyKeyboard::new(vec![vec![MenuCommand::BackToMenu.label().to_string()]])
}

fn token_choices(tokens: &[String]) -> ReplyKeyboard {
    ReplyKeyboard::grid(tokens, 2, Some(MenuCommand::BackToMenu.label()))
}

/// Startup check: labels are unique, map back to their command, and every
/// command other than "back" is reachable from the main keyboard.
pub fn validate_menu() -> Result<()> {
    for (idx, cmd) in MenuCommand::ALL.iter().enumerate() {
        if MenuCommand::from_label(cmd.label()) != Some(*cmd) {
            return Err(Error::Config(format!(
                "menu label {:?} does not map back to {cmd:?}",
                cmd.label()
            )));
        }
        if MenuCommand::ALL[..idx]
            .iter()
            .any(|other| other.label() == cmd.label())
        {
            return Err(Error::Config(format!("duplicate menu label {:?}", cmd.label())));
        }
        let on_keyboard = MAIN_MENU.iter().any(|row| row.contains(cmd));
        if *cmd != MenuCommand::BackToMenu && !on_keyboard {
            return Err(Error::Config(format!("{cmd:?} is missing from the main menu")));
        }
    }
    Ok(())
}

/// In-progress multi-turn operation awaiting the operator's next message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingAction {
    AddToken,
    SetDestination,
    SetKeywords,
    SelectToken,
    DeleteToken,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum DestinationInput {
    Id(i64),
    Handle(String),
}

fn parse_destination(text: &str) -> Option<DestinationInput> {
    let t = text.trim();
    if let Some(name) = t.strip_prefix(HANDLE_MARKER) {
        let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        return valid.then(|| DestinationInput::Handle(t.to_string()));
    }
    t.parse::<i64>().ok().map(DestinationInput::Id)
}

pub struct Conversation {
    store: Arc<ConfigStore>,
    scheduler: PollScheduler,
    resolver: Arc<dyn ChatResolver>,
    keyword_delimiters: Vec<char>,
    sessions: Mutex<HashMap<UserId, PendingAction>>,
}

impl Conversation {
    pub fn new(
        store: Arc<ConfigStore>,
        scheduler: PollScheduler,
        resolver: Arc<dyn ChatResolver>,
        keyword_delimiters: Vec<char>,
    ) -> Self {
        Self {
            store,
            scheduler,
            resolver,
            keyword_delimiters,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn pending(&self, user: UserId) -> Option<PendingAction> {
        self.sessions.lock().await.get(&user).copied()
    }

    async fn set_pending(&self, user: UserId, action: PendingAction) {
        self.sessions.lock().await.insert(user, action);
    }

    async fn clear_pending(&self, user: UserId) {
        self.sessions.lock().await.remove(&user);
    }

    /// `/start` and `/menu`: drop any pending action and show the menu.
    pub async fn reset(&self, user: UserId) -> Reply {
        self.clear_pending(user).await;
        Reply::new(
            "Welcome to the SMS forwarding bot ✉️\n\
Use the keyboard below to configure tokens, the destination and keywords, \
then press “▶️ Start forwarding”.",
            main_menu(),
        )
    }

    pub fn help(&self) -> Reply {
        let items = MAIN_MENU
            .iter()
            .flat_map(|row| row.iter())
            .map(|c| format!("• {}", escape_html(c.label())))
            .collect::<Vec<_>>()
            .join("\n");
        Reply::new(
            format!(
                "📋 <b>Commands</b>\n\
/start, /menu - Show the menu\n\
/status - Show the current configuration\n\
/help - Show this message\n\n\
<b>Menu</b>\n{items}\n\n\
While the bot waits for input, press “{}” to cancel.",
                escape_html(MenuCommand::BackToMenu.label())
            ),
            main_menu(),
        )
    }

    /// Interpret one free-text message from `user`.
    pub async fn handle_text(&self, user: UserId, text: &str) -> Reply {
        let text = text.trim();
        match self.pending(user).await {
            Some(action) => self.handle_pending(user, action, text).await,
            None => self.handle_menu(user, text).await,
        }
    }

    async fn handle_menu(&self, user: UserId, text: &str) -> Reply {
        let Some(cmd) = MenuCommand::from_label(text) else {
            return Reply::new("Please use the keyboard buttons.", main_menu());
        };

        match cmd {
            MenuCommand::AddToken => {
                self.set_pending(user, PendingAction::AddToken).await;
                Reply::new("Send the new SMS token:", back_only())
            }
            MenuCommand::SwitchToken | MenuCommand::DeleteToken => {
                let cfg = self.store.read().await;
                if cfg.source_tokens.is_empty() {
                    return Reply::new("No SMS tokens yet, add one first.", main_menu());
                }
                let (action, prompt) = if cmd == MenuCommand::SwitchToken {
                    (PendingAction::SelectToken, "Choose the SMS token to use:")
                } else {
                    (PendingAction::DeleteToken, "Choose the SMS token to delete:")
                };
                self.set_pending(user, action).await;
                Reply::new(prompt, token_choices(&cfg.source_tokens))
            }
            MenuCommand::SetDestination => {
                self.set_pending(user, PendingAction::SetDestination).await;
                Reply::new(
                    "Send the destination chat id (e.g. <code>-1001234567890</code>) \
or the channel username (e.g. <code>@mychannel</code>):",
                    back_only(),
                )
            }
            MenuCommand::SetKeywords => {
                self.set_pending(user, PendingAction::SetKeywords).await;
                Reply::new(
                    "Send keywords separated by commas. \
Send a lone <code>,</code> to clear them and forward every SMS:",
                    back_only(),
                )
            }
            MenuCommand::StartForwarding => self.start_forwarding().await,
            MenuCommand::StopForwarding => match self.scheduler.stop().await {
                Ok(_) => Reply::new("⏹ Forwarding stopped.", main_menu()),
                Err(e) => Reply::new(
                    format!("Failed to stop forwarding: {}", escape_html(&e.to_string())),
                    main_menu(),
                ),
            },
            MenuCommand::ShowConfig => self.show_config().await,
            MenuCommand::BackToMenu => Reply::new("Back to the main menu.", main_menu()),
        }
    }

    async fn start_forwarding(&self) -> Reply {
        match self.scheduler.start().await {
            Ok(true) => Reply::new("▶️ Forwarding started.", main_menu()),
            Ok(false) => Reply::new("Forwarding is already running.", main_menu()),
            Err(Error::PreconditionNotMet(reason)) => {
                let hint = if reason.contains("token") {
                    "Add an SMS token first."
                } else {
                    "Set the destination chat first."
                };
                Reply::new(
                    format!("⚠️ Cannot start forwarding: {}. {hint}", escape_html(&reason)),
                    main_menu(),
                )
            }
            Err(e) => Reply::new(
                format!("Failed to start forwarding: {}", escape_html(&e.to_string())),
                main_menu(),
            ),
        }
    }

    async fn handle_pending(&self, user: UserId, action: PendingAction, text: &str) -> Reply {
        if text == MenuCommand::BackToMenu.label() {
            self.clear_pending(user).await;
            return Reply::new("Cancelled. Back to the main menu.", main_menu());
        }

        let outcome = match action {
            PendingAction::AddToken => self.add_token(text).await,
            PendingAction::SetDestination => self.set_destination(text).await,
            PendingAction::SetKeywords => self.set_keywords(text).await,
            PendingAction::SelectToken => self.select_token(text).await,
            PendingAction::DeleteToken => self.delete_token(text).await,
        };

        match outcome {
            Step::Done(html) => {
                self.clear_pending(user).await;
                Reply::new(html, main_menu())
            }
            Step::Retry(reply) => reply,
        }
    }

    async fn add_token(&self, text: &str) -> Step {
        if text.is_empty() {
            return Step::retry("Token cannot be empty, send it again:", back_only());
        }
        if MenuCommand::from_label(text).is_some() {
            return Step::retry(
                "That is a menu button, not a token. Send the SMS token text:",
                back_only(),
            );
        }
        let token = text.to_string();
        let res = self
            .store
            .mutate(|cfg| {
                if !cfg.source_tokens.contains(&token) {
                    cfg.source_tokens.push(token.clone());
                }
                cfg.active_source_token = Some(token.clone());
                Ok(cfg.source_tokens.len())
            })
            .await;
        match res {
            Ok(count) => {
                tracing::info!(token_count = count, "SMS token added");
                Step::Done(format!("✅ SMS token added and activated: {}", code(&token)))
            }
            Err(e) => Step::retry(retry_text(&e), back_only()),
        }
    }

    async fn set_destination(&self, text: &str) -> Step {
        let chat_id = match parse_destination(text) {
            Some(DestinationInput::Id(id)) => ChatId(id),
            Some(DestinationInput::Handle(handle)) => {
                match self.resolver.resolve_handle(&handle).await {
                    Ok(id) => id,
                    Err(e) => {
                        tracing::warn!(%handle, error = %e, "failed to resolve destination");
                        return Step::retry(
                            format!(
                                "Could not resolve {}: {}\nSend a chat id or @username:",
                                escape_html(&handle),
                                escape_html(&e.to_string())
                            ),
                            back_only(),
                        );
                    }
                }
            }
            None => {
                return Step::retry("Please send a numeric chat id or an @username:", back_only())
            }
        };

        let patch = ConfigPatch {
            destination: Some(Some(chat_id.0)),
            ..Default::default()
        };
        match self.store.update(patch).await {
            Ok(_) => Step::Done(format!("🎯 Destination set to {}", code(&chat_id.0.to_string()))),
            Err(e) => Step::retry(retry_text(&e), back_only()),
        }
    }

    async fn set_keywords(&self, text: &str) -> Step {
        let keywords = parse_keywords(text, &self.keyword_delimiters);
        let patch = ConfigPatch {
            keywords: Some(keywords.clone()),
            ..Default::default()
        };
        match self.store.update(patch).await {
            Ok(_) if keywords.is_empty() => {
                Step::Done("🔑 Keywords cleared, every SMS will be forwarded.".to_string())
            }
            Ok(_) => Step::Done(format!(
                "🔑 Keywords updated: {}",
                escape_html(&keywords.join(", "))
            )),
            Err(e) => Step::retry(retry_text(&e), back_only()),
        }
    }

    async fn select_token(&self, text: &str) -> Step {
        let token = text.to_string();
        let res = self
            .store
            .mutate(|cfg| {
                if cfg.source_tokens.is_empty() {
                    return Ok(None);
                }
                if !cfg.source_tokens.contains(&token) {
                    return Err(Error::Validation("unknown token".to_string()));
                }
                cfg.active_source_token = Some(token.clone());
                Ok(Some(()))
            })
            .await;

        match res {
            Ok(Some(())) => Step::Done(format!("🔄 Now using SMS token {}", code(&token))),
            Ok(None) => Step::Done(STALE_TOKENS.to_string()),
            Err(_) => self.retry_choice("Invalid token, choose one from the list:").await,
        }
    }

    async fn delete_token(&self, text: &str) -> Step {
        let token = text.to_string();
        let res = self
            .store
            .mutate(|cfg| {
                if cfg.source_tokens.is_empty() {
                    return Ok(None);
                }
                if !cfg.source_tokens.contains(&token) {
                    return Err(Error::Validation("unknown token".to_string()));
                }
                cfg.source_tokens.retain(|t| t != &token);
                if cfg.active_source_token.as_deref() == Some(token.as_str()) {
                    cfg.active_source_token = cfg.source_tokens.first().cloned();
                }
                Ok(Some(cfg.active_source_token.clone()))
            })
            .await;

        match res {
            Ok(Some(active)) => {
                let tail = match active {
                    Some(a) => format!("Active token: {}", code(&a)),
                    None => "No active token now.".to_string(),
                };
                Step::Done(format!("🗑 Deleted SMS token {}\n{tail}", code(&token)))
            }
            Ok(None) => Step::Done(STALE_TOKENS.to_string()),
            Err(_) => self.retry_choice("Invalid token, choose one from the list:").await,
        }
    }

    async fn retry_choice(&self, prompt: &str) -> Step {
        let cfg = self.store.read().await;
        Step::retry(prompt, token_choices(&cfg.source_tokens))
    }

    pub async fn show_config(&self) -> Reply {
        let cfg = self.store.read().await;
        let status = self.scheduler.status().await;
        Reply::new(render_config(&cfg, status.state, status.last_tick_at), main_menu())
    }
}

const STALE_TOKENS: &str = "There are no SMS tokens any more. Back to the main menu.";

/// Result of interpreting a pending action's input.
enum Step {
    /// Applied; leave the pending state with this confirmation.
    Done(String),
    /// Rejected; stay in the pending state and send this prompt.
    Retry(Reply),
}

impl Step {
    fn retry(html: impl Into<String>, keyboard: ReplyKeyboard) -> Self {
        Step::Retry(Reply::new(html, keyboard))
    }
}

fn retry_text(e: &Error) -> String {
    format!("{}\nPlease try again:", escape_html(&e.to_string()))
}

fn render_config(
    cfg: &ForwardConfig,
    state: SchedulerState,
    last_tick_at: Option<chrono::DateTime<chrono::Local>>,
) -> String {
    let not_set = "<i>not set</i>";
    let active = cfg
        .active_source_token
        .as_deref()
        .map(code)
        .unwrap_or_else(|| not_set.to_string());
    let destination = cfg
        .destination
        .map(|d| code(&d.to_string()))
        .unwrap_or_else(|| not_set.to_string());
    let keywords = if cfg.keywords.is_empty() {
        "<i>none (forwarding every SMS)</i>".to_string()
    } else {
        escape_html(&cfg.keywords.join(", "))
    };
    let forwarding = match (cfg.forwarding_enabled, state) {
        (true, SchedulerState::Running) => "running",
        (true, SchedulerState::Idle) => "enabled, poller idle",
        (false, _) => "stopped",
    };
    let mark = cfg
        .high_water_mark
        .map(|m| code(&m.to_string()))
        .unwrap_or_else(|| "<i>none</i>".to_string());
    let last_poll = last_tick_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());

    format!(
        "⚙️ <b>Current configuration</b>\n\
• Tokens: {}\n\
• Active token: {active}\n\
• Destination: {destination}\n\
• Keywords: {keywords}\n\
• Forwarding: {forwarding}\n\
• Last forwarded SMS id: {mark}\n\
• Poll interval: {}s\n\
• Last poll: {last_poll}",
        cfg.source_tokens.len(),
        cfg.poll_interval_seconds,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{MessageId, MessageRef},
        forwarder::Forwarder,
        messaging::port::MessagingPort,
        source::{SourceClient, SourceMessage},
    };
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::time::Duration;

    struct EmptySource;

    #[async_trait]
    impl SourceClient for EmptySource {
        async fn fetch(&self, _token: &str) -> Result<Vec<SourceMessage>> {
            Ok(Vec::new())
        }
    }

    struct NullMessenger;

    #[async_trait]
    impl MessagingPort for NullMessenger {
        async fn send_html(&self, chat_id: ChatId, _html: &str) -> Result<MessageRef> {
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(1),
            })
        }

        async fn send_reply(&self, chat_id: ChatId, _reply: &Reply) -> Result<MessageRef> {
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(1),
            })
        }
    }

    struct FakeResolver;

    #[async_trait]
    impl ChatResolver for FakeResolver {
        async fn resolve_handle(&self, handle: &str) -> Result<ChatId> {
            match handle {
                "@mychannel" => Ok(ChatId(-100777)),
                _ => Err(Error::External("chat not found".to_string())),
            }
        }
    }

    const OP: UserId = UserId(1);

    fn tmp(prefix: &str) -> PathBuf {
        let pid = std::process::id();
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}/config.json"))
    }

    fn conversation(prefix: &str) -> (Conversation, Arc<ConfigStore>) {
        let store = Arc::new(ConfigStore::load(tmp(prefix)));
        let forwarder = Forwarder::new(Arc::new(NullMessenger), Duration::from_secs(1));
        let scheduler = PollScheduler::new(store.clone(), Arc::new(EmptySource), forwarder);
        let conv = Conversation::new(
            store.clone(),
            scheduler,
            Arc::new(FakeResolver),
            vec![',', '\u{ff0c}'],
        );
        (conv, store)
    }

    async fn press(conv: &Conversation, cmd: MenuCommand) -> Reply {
        conv.handle_text(OP, cmd.label()).await
    }

    async fn seed_tokens(store: &ConfigStore, tokens: &[&str], active: Option<&str>) {
        store
            .update(ConfigPatch {
                source_tokens: Some(tokens.iter().map(|s| s.to_string()).collect()),
                active_source_token: Some(active.map(str::to_string)),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    #[test]
    fn menu_is_consistent() {
        validate_menu().unwrap();
        for cmd in MenuCommand::ALL {
            assert_eq!(MenuCommand::from_label(cmd.label()), Some(cmd));
        }
        assert_eq!(MenuCommand::from_label("hello"), None);
        assert_eq!(main_menu().labels().count(), MenuCommand::ALL.len() - 1);
    }

    #[test]
    fn destination_input_parsing() {
        assert_eq!(parse_destination(" -100123 "), Some(DestinationInput::Id(-100123)));
        assert_eq!(
            parse_destination("@my_channel"),
            Some(DestinationInput::Handle("@my_channel".to_string()))
        );
        assert_eq!(parse_destination("@"), None);
        assert_eq!(parse_destination("@bad name"), None);
        assert_eq!(parse_destination("group"), None);
    }

    #[tokio::test]
    async fn unrecognized_input_redisplays_menu() {
        let (conv, store) = conversation("conv-unknown");
        let before = store.read().await;
        let reply = conv.handle_text(OP, "what?").await;
        assert_eq!(reply.keyboard, main_menu());
        assert_eq!(conv.pending(OP).await, None);
        assert_eq!(store.read().await, before);
    }

    #[tokio::test]
    async fn add_token_flow_dedupes_and_activates() {
        let (conv, store) = conversation("conv-add");

        press(&conv, MenuCommand::AddToken).await;
        assert_eq!(conv.pending(OP).await, Some(PendingAction::AddToken));

        let reply = conv.handle_text(OP, "   ").await;
        assert_eq!(reply.keyboard, back_only());
        assert_eq!(conv.pending(OP).await, Some(PendingAction::AddToken));

        conv.handle_text(OP, "A").await;
        assert_eq!(conv.pending(OP).await, None);

        press(&conv, MenuCommand::AddToken).await;
        conv.handle_text(OP, "B").await;
        press(&conv, MenuCommand::AddToken).await;
        let reply = conv.handle_text(OP, " A ").await;
        assert!(reply.html.contains("<code>A</code>"));

        let cfg = store.read().await;
        assert_eq!(cfg.source_tokens, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(cfg.active_source_token.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn menu_label_is_not_accepted_as_token() {
        let (conv, store) = conversation("conv-add-label");

        press(&conv, MenuCommand::AddToken).await;
        let reply = press(&conv, MenuCommand::StartForwarding).await;
        assert_eq!(reply.keyboard, back_only());
        assert_eq!(conv.pending(OP).await, Some(PendingAction::AddToken));
        assert!(store.read().await.source_tokens.is_empty());

        conv.handle_text(OP, "T1").await;
        assert_eq!(store.read().await.source_tokens, vec!["T1".to_string()]);
    }

    #[tokio::test]
    async fn deleting_active_token_reassigns_to_first_remaining() {
        let (conv, store) = conversation("conv-delete");
        seed_tokens(&store, &["A", "B"], Some("A")).await;

        let reply = press(&conv, MenuCommand::DeleteToken).await;
        assert_eq!(
            reply.keyboard.rows,
            vec![
                vec!["A".to_string(), "B".to_string()],
                vec![MenuCommand::BackToMenu.label().to_string()],
            ]
        );
        conv.handle_text(OP, "A").await;
        let cfg = store.read().await;
        assert_eq!(cfg.source_tokens, vec!["B".to_string()]);
        assert_eq!(cfg.active_source_token.as_deref(), Some("B"));

        press(&conv, MenuCommand::DeleteToken).await;
        let reply = conv.handle_text(OP, "B").await;
        assert!(reply.html.contains("No active token"));
        let cfg = store.read().await;
        assert!(cfg.source_tokens.is_empty());
        assert_eq!(cfg.active_source_token, None);
    }

    #[tokio::test]
    async fn deleting_inactive_token_keeps_active() {
        let (conv, store) = conversation("conv-delete-other");
        seed_tokens(&store, &["A", "B", "C"], Some("C")).await;

        press(&conv, MenuCommand::DeleteToken).await;
        conv.handle_text(OP, "A").await;
        let cfg = store.read().await;
        assert_eq!(cfg.source_tokens, vec!["B".to_string(), "C".to_string()]);
        assert_eq!(cfg.active_source_token.as_deref(), Some("C"));
    }

    #[tokio::test]
    async fn select_token_requires_exact_match() {
        let (conv, store) = conversation("conv-select");
        seed_tokens(&store, &["A", "B"], Some("A")).await;

        press(&conv, MenuCommand::SwitchToken).await;
        assert_eq!(conv.pending(OP).await, Some(PendingAction::SelectToken));

        let reply = conv.handle_text(OP, "b").await;
        assert!(reply.html.contains("Invalid token"));
        assert_eq!(conv.pending(OP).await, Some(PendingAction::SelectToken));
        assert_eq!(store.read().await.active_source_token.as_deref(), Some("A"));

        conv.handle_text(OP, "B").await;
        assert_eq!(conv.pending(OP).await, None);
        assert_eq!(store.read().await.active_source_token.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn switching_without_tokens_stays_at_menu() {
        let (conv, _store) = conversation("conv-switch-empty");
        let reply = press(&conv, MenuCommand::SwitchToken).await;
        assert!(reply.html.contains("No SMS tokens"));
        assert_eq!(conv.pending(OP).await, None);
    }

    #[tokio::test]
    async fn stale_selection_returns_to_menu() {
        let (conv, store) = conversation("conv-stale");
        seed_tokens(&store, &["A"], Some("A")).await;
        press(&conv, MenuCommand::SwitchToken).await;

        // Token list emptied elsewhere while the operator was choosing.
        seed_tokens(&store, &[], None).await;
        let reply = conv.handle_text(OP, "A").await;
        assert_eq!(reply.html, STALE_TOKENS);
        assert_eq!(reply.keyboard, main_menu());
        assert_eq!(conv.pending(OP).await, None);
    }

    #[tokio::test]
    async fn keywords_are_normalized_and_can_be_cleared() {
        let (conv, store) = conversation("conv-keywords");

        press(&conv, MenuCommand::SetKeywords).await;
        conv.handle_text(OP, "foo, BAR").await;
        assert_eq!(
            store.read().await.keywords,
            vec!["foo".to_string(), "bar".to_string()]
        );
        assert!(crate::filter::matches("a Bar b", &store.read().await.keywords));

        press(&conv, MenuCommand::SetKeywords).await;
        let reply = conv.handle_text(OP, "\u{ff0c}").await;
        assert!(reply.html.contains("cleared"));
        assert!(store.read().await.keywords.is_empty());
    }

    #[tokio::test]
    async fn destination_accepts_ids_and_resolved_handles() {
        let (conv, store) = conversation("conv-destination");

        press(&conv, MenuCommand::SetDestination).await;
        conv.handle_text(OP, "not a chat").await;
        assert_eq!(conv.pending(OP).await, Some(PendingAction::SetDestination));

        conv.handle_text(OP, "@unknown").await;
        assert_eq!(conv.pending(OP).await, Some(PendingAction::SetDestination));
        assert_eq!(store.read().await.destination, None);

        conv.handle_text(OP, "@mychannel").await;
        assert_eq!(conv.pending(OP).await, None);
        assert_eq!(store.read().await.destination, Some(-100777));

        press(&conv, MenuCommand::SetDestination).await;
        conv.handle_text(OP, "-1001234").await;
        assert_eq!(store.read().await.destination, Some(-1001234));
    }

    #[tokio::test]
    async fn back_cancels_without_mutation() {
        let (conv, store) = conversation("conv-back");
        press(&conv, MenuCommand::SetKeywords).await;
        let before = store.read().await;

        let reply = press(&conv, MenuCommand::BackToMenu).await;
        assert!(reply.html.contains("Cancelled"));
        assert_eq!(conv.pending(OP).await, None);
        assert_eq!(store.read().await, before);
    }

    #[tokio::test]
    async fn start_without_token_gives_guidance() {
        let (conv, store) = conversation("conv-start");
        let reply = press(&conv, MenuCommand::StartForwarding).await;
        assert!(reply.html.contains("Add an SMS token first"));
        assert!(!store.read().await.forwarding_enabled);

        seed_tokens(&store, &["A"], Some("A")).await;
        let reply = press(&conv, MenuCommand::StartForwarding).await;
        assert!(reply.html.contains("destination"));
        assert!(!store.read().await.forwarding_enabled);
    }

    #[tokio::test]
    async fn start_then_stop_toggles_forwarding() {
        let (conv, store) = conversation("conv-toggle");
        seed_tokens(&store, &["A"], Some("A")).await;
        store
            .update(ConfigPatch {
                destination: Some(Some(42)),
                ..Default::default()
            })
            .await
            .unwrap();

        let reply = press(&conv, MenuCommand::StartForwarding).await;
        assert!(reply.html.contains("started"));
        let reply = press(&conv, MenuCommand::StartForwarding).await;
        assert!(reply.html.contains("already running"));
        assert!(store.read().await.forwarding_enabled);

        let reply = press(&conv, MenuCommand::ShowConfig).await;
        assert!(reply.html.contains("Forwarding: running"));

        press(&conv, MenuCommand::StopForwarding).await;
        assert!(!store.read().await.forwarding_enabled);
    }

    #[tokio::test]
    async fn reset_clears_pending_action() {
        let (conv, _store) = conversation("conv-reset");
        press(&conv, MenuCommand::AddToken).await;
        let reply = conv.reset(OP).await;
        assert_eq!(reply.keyboard, main_menu());
        assert_eq!(conv.pending(OP).await, None);
    }

    #[tokio::test]
    async fn show_config_lists_settings() {
        let (conv, store) = conversation("conv-show");
        seed_tokens(&store, &["A", "B"], Some("B")).await;
        store
            .update(ConfigPatch {
                keywords: Some(vec!["otp".to_string()]),
                high_water_mark: Some(12),
                ..Default::default()
            })
            .await
            .unwrap();

        let html = conv.show_config().await.html;
        assert!(html.contains("Tokens: 2"));
        assert!(html.contains("Active token: <code>B</code>"));
        assert!(html.contains("Destination: <i>not set</i>"));
        assert!(html.contains("Keywords: otp"));
        assert!(html.contains("Forwarding: stopped"));
        assert!(html.contains("<code>12</code>"));
        assert!(html.contains("Last poll: never"));
    }

    #[tokio::test]
    async fn sessions_are_per_operator() {
        let (conv, _store) = conversation("conv-sessions");
        press(&conv, MenuCommand::AddToken).await;
        assert_eq!(conv.pending(UserId(2)).await, None);
        conv.handle_text(UserId(2), "A").await;
        assert_eq!(conv.pending(OP).await, Some(PendingAction::AddToken));
    }
}
