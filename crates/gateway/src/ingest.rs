use std::sync::Arc;
use std::time::Duration;

use cb_domain::config::WebhookConfig;
use cb_domain::model::now_ms;
use cb_domain::{Error, Result};
use cb_store::Store;

use crate::commands::CommandHandler;
use crate::telegram::Update;

const LEASE_MS: i64 = 30_000;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Leases and drains the ingest-job queue for one bot, handing each
/// normalized update to the command handler.
pub struct IngestWorker {
    store: Store,
    handler: Arc<CommandHandler>,
    bot_id: String,
}

impl IngestWorker {
    pub fn new(store: Store, handler: Arc<CommandHandler>, bot_id: String) -> Self {
        Self { store, handler, bot_id }
    }

    /// Runs until cancelled. Intended to be driven by a single long-lived
    /// `tokio::spawn` per bot.
    pub async fn run(&self) {
        let owner = format!("ingest-{}", uuid::Uuid::new_v4());
        let mut last_heartbeat = std::time::Instant::now();

        loop {
            if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                if let Err(e) = self.store.increment_metric(&self.bot_id, "worker_heartbeat.update_worker", 1, now_ms()).await {
                    tracing::warn!(bot_id = %self.bot_id, error = %e, "heartbeat failed");
                }
                last_heartbeat = std::time::Instant::now();
            }

            let leased = match self.store.lease_next_update_job(&self.bot_id, &owner, now_ms(), LEASE_MS).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(bot_id = %self.bot_id, error = %e, "lease_next_update_job failed");
                    tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                    continue;
                }
            };

            let renew_store = self.store.clone();
            let renew_owner = owner.clone();
            let renew_job_id = leased.id.clone();
            let renewal = tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis((LEASE_MS / 2) as u64)).await;
                    if renew_store.renew_update_lease(&renew_job_id, &renew_owner, now_ms(), LEASE_MS).await.unwrap_or(false) {
                        continue;
                    }
                    break;
                }
            });

            if let Err(e) = self.process(&leased.id).await {
                let _ = self.store.fail_update_job(&leased.id, &e.to_string()).await;
            } else {
                let _ = self.store.complete_update_job(&leased.id).await;
            }

            renewal.abort();
        }
    }

    async fn process(&self, job_id: &str) -> Result<()> {
        let Some((_update_id, payload_json)) = self.store.get_update_for_job(job_id).await? else {
            return Err(Error::Store(format!("update job {job_id} has no matching raw update")));
        };
        let update: Update = serde_json::from_str(&payload_json)?;
        let Some(incoming) = update.into_incoming() else {
            return Ok(());
        };
        self.handler.handle(&incoming).await
    }
}

/// Background polling loop for bots without a configured webhook. Advances
/// the dedup offset by the highest `update_id` seen so far.
pub async fn run_polling(store: Store, bot_id: String, client: crate::telegram::TelegramClient) {
    let mut offset = store.max_update_id(&bot_id).await.unwrap_or(None).map(|id| id + 1).unwrap_or(0);

    loop {
        let updates = match client.get_updates(offset, 25).await {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!(bot_id = %bot_id, error = %e, "get_updates failed");
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }
        };

        for update in &updates {
            let chat_id = update
                .message
                .as_ref()
                .map(|m| m.chat.id.to_string())
                .or_else(|| update.callback_query.as_ref().and_then(|c| c.message.as_ref()).map(|m| m.chat.id.to_string()));
            let payload = serde_json::to_string(update).unwrap_or_default();
            match store.insert_update(&bot_id, update.update_id, chat_id.as_deref(), &payload, now_ms()).await {
                Ok(_) => offset = offset.max(update.update_id + 1),
                Err(e) => tracing::warn!(bot_id = %bot_id, error = %e, "insert_update failed during polling"),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Unauthorized,
    BadRequest,
    Accepted,
}

/// Validates and ingests one webhook delivery for a single, already-resolved
/// bot. The caller (the HTTP router) is responsible for the "unknown bot"
/// 404 case, since that depends on the multi-bot registry.
pub async fn ingest_webhook_update(
    store: &Store,
    bot_id: &str,
    webhook: &WebhookConfig,
    path_secret: &str,
    secret_header: Option<&str>,
    body: &str,
) -> Result<WebhookOutcome> {
    if path_secret != webhook.path_secret {
        return Ok(WebhookOutcome::Unauthorized);
    }
    if secret_header != Some(webhook.secret_token.as_str()) {
        return Ok(WebhookOutcome::Unauthorized);
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return Ok(WebhookOutcome::BadRequest);
    };
    let Some(update_id) = value.get("update_id").and_then(|v| v.as_i64()) else {
        return Ok(WebhookOutcome::BadRequest);
    };
    let chat_id = value
        .get("message")
        .or_else(|| value.get("callback_query").and_then(|c| c.get("message")))
        .and_then(|m| m.get("chat"))
        .and_then(|c| c.get("id"))
        .and_then(|v| v.as_i64())
        .map(|id| id.to_string());

    store.insert_update(bot_id, update_id, chat_id.as_deref(), body, now_ms()).await?;
    Ok(WebhookOutcome::Accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_domain::config::WebhookConfig;
    use sqlx::any::{install_default_drivers, AnyPoolOptions};

    async fn test_store() -> Store {
        install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        sqlx::raw_sql(cb_store::schema::SCHEMA_SQL).execute(&pool).await.unwrap();
        Store::new(pool, false)
    }

    fn webhook() -> WebhookConfig {
        WebhookConfig { path_secret: "path123".into(), secret_token: "secret456".into(), public_url: None }
    }

    #[tokio::test]
    async fn rejects_wrong_path_secret() {
        let store = test_store().await;
        let outcome = ingest_webhook_update(&store, "bot1", &webhook(), "wrong", Some("secret456"), "{}").await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Unauthorized);
    }

    #[tokio::test]
    async fn rejects_missing_header() {
        let store = test_store().await;
        let outcome = ingest_webhook_update(&store, "bot1", &webhook(), "path123", None, "{}").await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Unauthorized);
    }

    #[tokio::test]
    async fn rejects_body_without_update_id() {
        let store = test_store().await;
        let outcome = ingest_webhook_update(&store, "bot1", &webhook(), "path123", Some("secret456"), "{}").await.unwrap();
        assert_eq!(outcome, WebhookOutcome::BadRequest);
    }

    #[tokio::test]
    async fn accepts_a_valid_delivery_and_enqueues_it() {
        let store = test_store().await;
        let body = r#"{"update_id": 5, "message": {"chat": {"id": 99}, "text": "hi"}}"#;
        let outcome = ingest_webhook_update(&store, "bot1", &webhook(), "path123", Some("secret456"), body).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Accepted);
        assert_eq!(store.max_update_id("bot1").await.unwrap(), Some(5));
    }
}
