use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use cb_domain::config::BotConfig;
use cb_store::Store;

use crate::commands::CommandHandler;
use crate::telegram::TelegramClient;

/// Everything one configured bot needs at runtime: its config, its store
/// handle, the command handler the ingest worker dispatches into, and the
/// Telegram client used both for outbound replies and artifact delivery.
#[derive(Clone)]
pub struct BotRuntime {
    pub bot_config: BotConfig,
    pub store: Store,
    pub handler: Arc<CommandHandler>,
    pub telegram: Arc<TelegramClient>,
}

/// Shared state handed to every axum handler. Keyed by `bot_id` so a single
/// `run-gateway` process can serve webhooks and admin metrics for several
/// bots sharing one inbound HTTP port.
#[derive(Clone)]
pub struct AppState {
    pub bots: Arc<HashMap<String, BotRuntime>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(bots: HashMap<String, BotRuntime>) -> Self {
        Self { bots: Arc::new(bots), started_at: Instant::now() }
    }

    pub fn bot(&self, bot_id: &str) -> Option<&BotRuntime> {
        self.bots.get(bot_id)
    }
}
