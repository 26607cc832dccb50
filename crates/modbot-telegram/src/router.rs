use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use modbot_core::{
    admin_cache::AdminCache,
    appeals::AppealEngine,
    config::Config,
    messaging::port::MessagingPort,
    moderation::Pipeline,
    ports::{AdminApi, JobDispatcher},
    store::{AppealLog, ApprovalStore, CounterStore, RuleStore},
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub messenger: Arc<TelegramMessenger>,
    pub pipeline: Arc<Pipeline>,
    pub appeals: Arc<AppealEngine>,
    pub admin_cache: Arc<AdminCache>,
    pub approvals: Arc<dyn ApprovalStore>,
    pub rules: Arc<dyn RuleStore>,
}

/// Wire the ports together and run long polling until shutdown.
pub async fn run_polling(
    cfg: Arc<Config>,
    counters: Arc<dyn CounterStore>,
    appeal_log: Arc<dyn AppealLog>,
    approvals: Arc<dyn ApprovalStore>,
    rules: Arc<dyn RuleStore>,
    dispatcher: Arc<dyn JobDispatcher>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());

    if let Ok(me) = bot.get_me().await {
        tracing::info!("modbot started: @{}", me.username());
    }

    let messenger = Arc::new(TelegramMessenger::new(bot.clone()));
    let admin_api: Arc<dyn AdminApi> = messenger.clone();
    let messaging: Arc<dyn MessagingPort> = messenger.clone();

    let admin_cache = Arc::new(AdminCache::new(admin_api, cfg.admin_cache_ttl));
    let pipeline = Arc::new(Pipeline::new(approvals.clone(), dispatcher.clone()));
    let appeals = Arc::new(AppealEngine::new(
        counters,
        appeal_log,
        dispatcher,
        messaging,
        cfg.appeal_notify_threshold,
    ));

    let state = Arc::new(AppState {
        cfg,
        messenger,
        pipeline,
        appeals,
        admin_cache,
        approvals,
        rules,
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
