//! Read-only health, readiness and metrics endpoints. Intentionally
//! unauthenticated — `admin.token_env` is reserved for a future
//! authenticated admin action surface, not these probes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/metrics/:bot_id", get(bot_metrics))
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

/// Ready once every configured bot's store answers a trivial query. A bot
/// whose store connection has dropped fails the whole probe — a gateway
/// process serving several bots is not "ready" if any one of them can't
/// reach its database.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut ok = true;
    for runtime in state.bots.values() {
        if runtime.store.max_update_id(&runtime.bot_config.bot_id).await.is_err() {
            ok = false;
            break;
        }
    }
    let status = if ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(serde_json::json!({ "ok": ok })))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let mut bots = serde_json::Map::new();
    for (bot_id, runtime) in state.bots.iter() {
        bots.insert(bot_id.clone(), bot_metrics_json(runtime).await);
    }
    Json(serde_json::json!({
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "bots": bots,
    }))
}

async fn bot_metrics(State(state): State<AppState>, Path(bot_id): Path<String>) -> impl IntoResponse {
    match state.bot(&bot_id) {
        Some(runtime) => (StatusCode::OK, Json(bot_metrics_json(runtime).await)),
        None => (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "unknown bot" }))),
    }
}

async fn bot_metrics_json(runtime: &crate::state::BotRuntime) -> serde_json::Value {
    let bot_id = &runtime.bot_config.bot_id;
    let counters = runtime.store.metrics_snapshot(bot_id).await.unwrap_or_default();
    let update_queue_depth = runtime.store.queue_depth(bot_id, "telegram_update_jobs", &["queued", "leased"]).await.unwrap_or(0);
    let run_queue_depth = runtime.store.queue_depth(bot_id, "cli_run_jobs", &["queued", "leased"]).await.unwrap_or(0);
    let in_flight_runs = runtime.store.queue_depth(bot_id, "cli_run_jobs", &["in_flight"]).await.unwrap_or(0);
    let deferred_depth = runtime.store.queue_depth(bot_id, "deferred_button_actions", &["queued"]).await.unwrap_or(0);

    serde_json::json!({
        "counters": counters.into_iter().collect::<std::collections::HashMap<_, _>>(),
        "update_queue_depth": update_queue_depth,
        "run_queue_depth": run_queue_depth,
        "in_flight_runs": in_flight_runs,
        "deferred_queue_depth": deferred_depth,
    })
}
