use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::process::Command as ChildCommand;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use cb_domain::model::BotMode;

use crate::admin;
use crate::bootstrap;
use crate::config::{enforce, load_config};
use crate::ingest::{ingest_webhook_update, WebhookOutcome};
use crate::state::AppState;

/// The chatbot gateway's process CLI.
#[derive(Debug, Parser)]
#[command(name = "chatbot-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read the config, spawn one child process per configured bot, restart
    /// crashed children with capped backoff. Default when no subcommand is given.
    Supervisor,
    /// Run one bot's ingest worker, run worker, and (in embedded mode) its
    /// own webhook listener + admin server, all in this process.
    RunBot {
        #[arg(long)]
        bot_id: String,
        #[arg(long, default_value = "0.0.0.0")]
        embedded_host: String,
        #[arg(long, default_value_t = 8080)]
        embedded_port: u16,
    },
    /// Run the shared webhook listener + admin server for every
    /// `mode = gateway` bot. Their workers must be started separately
    /// (e.g. via `run-bot` without an embedded listener, per bot).
    RunGateway {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

impl Default for Command {
    fn default() -> Self {
        Command::Supervisor
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or_default() {
        Command::Supervisor => run_supervisor().await,
        Command::RunBot { bot_id, embedded_host, embedded_port } => {
            run_bot(&bot_id, &embedded_host, embedded_port).await
        }
        Command::RunGateway { host, port } => run_gateway(&host, port).await,
    }
}

// ── run-bot / run-gateway ──────────────────────────────────────────────

async fn run_bot(bot_id: &str, embedded_host: &str, embedded_port: u16) -> anyhow::Result<()> {
    let (config, issues) = load_config()?;
    enforce(&issues)?;

    let bot = config
        .bots
        .iter()
        .find(|b| b.bot_id == bot_id)
        .ok_or_else(|| anyhow::anyhow!("no bot configured with bot_id={bot_id}"))?;

    let runtime = bootstrap::build_bot_runtime(bot, config.database.url.as_deref()).await?;
    bootstrap::spawn_workers(&runtime);
    tracing::info!(bot_id = %bot_id, "bot workers started");

    if bot.mode != BotMode::Embedded {
        tracing::info!(bot_id = %bot_id, "gateway-mode bot has no embedded listener, idling on workers");
        wait_for_shutdown().await;
        return Ok(());
    }

    let mut bots = std::collections::HashMap::new();
    bots.insert(bot.bot_id.clone(), runtime);
    let state = AppState::new(bots);
    serve(state, embedded_host, embedded_port).await
}

async fn run_gateway(host: &str, port: u16) -> anyhow::Result<()> {
    let (config, issues) = load_config()?;
    enforce(&issues)?;

    let gateway_bots: Vec<_> = config.bots.iter().filter(|b| b.mode == BotMode::Gateway).cloned().collect();
    if gateway_bots.is_empty() {
        anyhow::bail!("run-gateway: no bots configured with mode=gateway");
    }

    let mut gateway_config = config.clone();
    gateway_config.bots = gateway_bots;
    let state = bootstrap::build_app_state(&gateway_config).await?;
    serve(state, host, port).await
}

async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    use axum::routing::post;
    use axum::Router;
    use tower_governor::governor::GovernorConfigBuilder;
    use tower_governor::GovernorLayer;

    let max_concurrent = std::env::var("CB_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);

    let governor_config = GovernorConfigBuilder::default()
        .per_second(10)
        .burst_size(30)
        .finish()
        .expect("rate_limit: requests_per_second and burst_size must be > 0");

    let app = Router::new()
        .route("/telegram/webhook/:bot_id/:path_secret", post(webhook_handler))
        .layer(GovernorLayer { config: std::sync::Arc::new(governor_config) })
        .merge(admin::router())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state);

    let addr = format!("{host}:{port}");
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;
    Ok(())
}

async fn webhook_handler(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::extract::Path((bot_id, path_secret)): axum::extract::Path<(String, String)>,
    headers: axum::http::HeaderMap,
    body: String,
) -> axum::response::Response {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    let Some(runtime) = state.bot(&bot_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(webhook) = runtime.bot_config.webhook.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let secret_header = headers
        .get("X-Telegram-Bot-Api-Secret-Token")
        .and_then(|v| v.to_str().ok());

    match ingest_webhook_update(&runtime.store, &bot_id, webhook, &path_secret, secret_header, &body).await {
        Ok(WebhookOutcome::Accepted) => StatusCode::OK.into_response(),
        Ok(WebhookOutcome::Unauthorized) => StatusCode::UNAUTHORIZED.into_response(),
        Ok(WebhookOutcome::BadRequest) => StatusCode::BAD_REQUEST.into_response(),
        Err(e) => {
            tracing::error!(bot_id = %bot_id, error = %e, "webhook ingest failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn wait_for_shutdown() {
    let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
    tracing::info!("shutdown signal received");
}

// ── supervisor ──────────────────────────────────────────────────────────

struct ProcessSpec {
    name: String,
    args: Vec<String>,
}

const MAX_BACKOFF_SECS: u64 = 60;
const TERMINATE_GRACE: Duration = Duration::from_secs(10);

async fn run_supervisor() -> anyhow::Result<()> {
    let (config, issues) = load_config()?;
    enforce(&issues)?;

    let exe = std::env::current_exe()?;
    let config_path = std::env::var("CB_CONFIG").unwrap_or_else(|_| "chatbot.yaml".into());

    let mut specs = Vec::new();
    let mut embedded_port = 8081u16;
    let mut any_gateway = false;

    for bot in &config.bots {
        match bot.mode {
            BotMode::Embedded => {
                specs.push(ProcessSpec {
                    name: format!("bot:{}:embedded", bot.bot_id),
                    args: vec![
                        "run-bot".into(),
                        "--bot-id".into(),
                        bot.bot_id.clone(),
                        "--embedded-host".into(),
                        "0.0.0.0".into(),
                        "--embedded-port".into(),
                        embedded_port.to_string(),
                    ],
                });
                embedded_port += 1;
            }
            BotMode::Gateway => {
                any_gateway = true;
                specs.push(ProcessSpec {
                    name: format!("bot:{}:worker", bot.bot_id),
                    args: vec!["run-bot".into(), "--bot-id".into(), bot.bot_id.clone()],
                });
            }
        }
    }

    if any_gateway {
        specs.push(ProcessSpec {
            name: "gateway".into(),
            args: vec![
                "run-gateway".into(),
                "--host".into(),
                config.admin.host.clone(),
                "--port".into(),
                config.admin.port.to_string(),
            ],
        });
    }

    if specs.is_empty() {
        anyhow::bail!("no process specs generated from bots config");
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut term = signal(SignalKind::terminate())?;
    let shutdown_signal = {
        let stop_tx = stop_tx.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
            tracing::info!("supervisor shutdown requested");
            let _ = stop_tx.send(true);
        }
    };

    let mut handles = Vec::new();
    for spec in specs {
        let exe = exe.clone();
        let config_path = config_path.clone();
        let stop_rx = stop_rx.clone();
        handles.push(tokio::spawn(async move {
            run_with_restart(exe, config_path, spec, stop_rx).await;
        }));
    }

    shutdown_signal.await;
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

async fn run_with_restart(exe: std::path::PathBuf, config_path: String, spec: ProcessSpec, mut stop_rx: watch::Receiver<bool>) {
    let mut attempt: u32 = 0;

    while !*stop_rx.borrow() {
        tracing::info!(name = %spec.name, "starting child process");
        let mut cmd = ChildCommand::new(&exe);
        cmd.env("CB_CONFIG", &config_path).args(&spec.args);
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(name = %spec.name, error = %e, "failed to spawn child process");
                attempt += 1;
                sleep_or_stop(backoff_secs(attempt), &mut stop_rx).await;
                continue;
            }
        };

        let exit_status = tokio::select! {
            status = child.wait() => Some(status),
            _ = stop_rx.changed() => None,
        };

        match exit_status {
            None => {
                terminate_child(&spec.name, &mut child).await;
                return;
            }
            Some(Ok(status)) if status.success() => {
                tracing::info!(name = %spec.name, "child process exited cleanly");
                return;
            }
            Some(Ok(status)) => {
                attempt += 1;
                let backoff = backoff_secs(attempt);
                tracing::warn!(name = %spec.name, code = ?status.code(), restart_in_secs = backoff, "child process exited, restarting");
                sleep_or_stop(backoff, &mut stop_rx).await;
            }
            Some(Err(e)) => {
                attempt += 1;
                let backoff = backoff_secs(attempt);
                tracing::error!(name = %spec.name, error = %e, restart_in_secs = backoff, "failed to wait on child process, restarting");
                sleep_or_stop(backoff, &mut stop_rx).await;
            }
        }
    }
}

fn backoff_secs(attempt: u32) -> u64 {
    MAX_BACKOFF_SECS.min(2u64.saturating_pow(attempt.min(6)))
}

async fn sleep_or_stop(secs: u64, stop_rx: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
        _ = stop_rx.changed() => {}
    }
}

// Children inherit the supervisor's process group, so a signal sent to the
// whole group (the common case: terminal Ctrl-C, or a service manager
// stopping the group) reaches them directly. This only waits for that exit
// and falls back to a hard kill if a child doesn't go down in time.
async fn terminate_child(name: &str, child: &mut tokio::process::Child) {
    tracing::info!(name, "terminating child process");
    if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok() {
        return;
    }
    tracing::warn!(name, "child process did not exit in time, killing");
    let _ = child.kill().await;
}
