//! `BotRuntime`/`AppState` construction and background-task spawning,
//! shared by the `run-bot` and `run-gateway` CLI subcommands.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;

use cb_adapters::AdapterRegistry;
use cb_domain::config::{BotConfig, Config};
use cb_sessions::SessionService;
use cb_store::Store;
use cb_streamer::EventStreamer;

use crate::commands::CommandHandler;
use crate::ingest::IngestWorker;
use crate::run_worker::RunWorker;
use crate::state::{AppState, BotRuntime};
use crate::telegram::TelegramClient;
use crate::youtube::HttpYoutubeSearch;

/// Wires up everything one configured bot needs: store connection, adapter
/// registry, session service, event streamer, youtube search, command
/// handler. Does not spawn any background task.
pub async fn build_bot_runtime(bot: &BotConfig, fallback_database_url: Option<&str>) -> anyhow::Result<BotRuntime> {
    let database_url = bot
        .database_url
        .as_deref()
        .or(fallback_database_url)
        .context("no database_url configured for this bot")?;

    let (pool, supports_skip_locked) = cb_store::connect(database_url)
        .await
        .with_context(|| format!("connecting store for bot {}", bot.bot_id))?;
    let store = Store::new(pool, supports_skip_locked);
    tracing::info!(bot_id = %bot.bot_id, "store connected");

    let adapters = Arc::new(AdapterRegistry::with_defaults());
    let sessions = SessionService::new(store.clone());

    let telegram = Arc::new(TelegramClient::new(&bot.telegram_token).context("building telegram client")?);
    let streamer = Arc::new(EventStreamer::new(telegram.clone()));
    let youtube = Arc::new(HttpYoutubeSearch::new().context("building youtube search client")?);

    let handler = Arc::new(CommandHandler::new(
        store.clone(),
        sessions.clone(),
        adapters.clone(),
        telegram.clone(),
        youtube,
        bot.clone(),
    ));

    Ok(BotRuntime { bot_config: bot.clone(), store, handler, telegram })
}

/// Builds one `BotRuntime` per configured bot and wraps them in an `AppState`
/// keyed by `bot_id`, for the webhook router and admin/metrics endpoints.
pub async fn build_app_state(config: &Config) -> anyhow::Result<AppState> {
    let fallback = config.database.url.as_deref();
    let mut bots = HashMap::new();
    for bot in &config.bots {
        let runtime = build_bot_runtime(bot, fallback).await?;
        bots.insert(bot.bot_id.clone(), runtime);
    }
    Ok(AppState::new(bots))
}

/// Spawns the ingest worker and run worker for one bot. If the bot has no
/// webhook configured, also spawns the polling loop. Runs until the process
/// exits; callers typically `tokio::join!`/await the supervisor's own
/// lifetime rather than these handles directly.
pub fn spawn_workers(runtime: &BotRuntime) {
    let bot_id = runtime.bot_config.bot_id.clone();

    {
        let store = runtime.store.clone();
        let handler = runtime.handler.clone();
        let bot_id = bot_id.clone();
        tokio::spawn(async move {
            IngestWorker::new(store, handler, bot_id).run().await;
        });
    }

    {
        let sessions = SessionService::new(runtime.store.clone());
        let adapters = Arc::new(AdapterRegistry::with_defaults());
        let streamer = Arc::new(EventStreamer::new(runtime.telegram.clone()));
        let worker = RunWorker::new(
            runtime.store.clone(),
            sessions,
            adapters,
            streamer,
            runtime.telegram.clone(),
            runtime.bot_config.clone(),
        );
        tokio::spawn(async move {
            worker.run().await;
        });
    }

    if runtime.bot_config.webhook.is_none() {
        let store = runtime.store.clone();
        let telegram = (*runtime.telegram).clone();
        tokio::spawn(async move {
            crate::ingest::run_polling(store, bot_id, telegram).await;
        });
    }
}
