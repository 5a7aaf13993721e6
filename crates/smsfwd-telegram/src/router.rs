use std::{collections::HashMap, sync::Arc};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::{Mutex, OwnedMutexGuard};

use smsfwd_core::{
    config::Config,
    conversation::{validate_menu, Conversation},
    forwarder::Forwarder,
    messaging::port::{ChatResolver, MessagingPort},
    scheduler::PollScheduler,
    source::SourceClient,
    store::ConfigStore,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub conversation: Arc<Conversation>,
    pub messenger: Arc<dyn MessagingPort>,
    pub chat_locks: Arc<ChatLocks>,
}

#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub async fn run_polling(cfg: Arc<Config>, source: Arc<dyn SourceClient>) -> anyhow::Result<()> {
    validate_menu()?;

    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => tracing::info!(bot = %me.username(), "smsfwd started"),
        Err(e) => tracing::warn!(error = %e, "get_me failed"),
    }
    tracing::info!(
        admins = cfg.admin_user_ids.len(),
        config_path = %cfg.config_path.display(),
        source = %cfg.sms_api_base,
        "runtime configuration"
    );

    // Long polling does not work while a webhook is registered.
    if let Err(e) = bot.delete_webhook().drop_pending_updates(true).await {
        tracing::warn!(error = %e, "delete_webhook failed");
    }

    let telegram = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = telegram.clone();
    let resolver: Arc<dyn ChatResolver> = telegram;

    let store = Arc::new(ConfigStore::load(cfg.config_path.clone()));
    let forwarder = Forwarder::new(messenger.clone(), cfg.forward_timeout);
    let scheduler = PollScheduler::new(store.clone(), source, forwarder);

    match scheduler.resume().await {
        Ok(true) => tracing::info!("forwarding resumed from saved configuration"),
        Ok(false) => {}
        Err(e) => tracing::warn!(error = %e, "failed to resume forwarding"),
    }

    let conversation = Arc::new(Conversation::new(
        store,
        scheduler.clone(),
        resolver,
        cfg.keyword_delimiters.clone(),
    ));

    let state = Arc::new(AppState {
        cfg,
        conversation,
        messenger,
        chat_locks: Arc::new(ChatLocks::default()),
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    scheduler.shutdown().await;
    tracing::info!("smsfwd stopped");
    Ok(())
}
