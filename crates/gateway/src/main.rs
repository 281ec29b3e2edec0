use clap::Parser;
use tracing_subscriber::EnvFilter;

mod action_tokens;
mod admin;
mod bootstrap;
mod cli;
mod commands;
mod config;
mod ingest;
mod model_presets;
mod run_worker;
mod state;
mod telegram;
mod youtube;

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    cli::run(cli).await
}

/// JSON logs by default; `CB_LOG_FORMAT=pretty` switches to human-readable
/// output for local development. Directives come from `RUST_LOG`, falling
/// back to a sensible default that keeps this crate at debug.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,cb_gateway=debug"));
    let pretty = std::env::var("CB_LOG_FORMAT").map(|v| v == "pretty").unwrap_or(false);

    if pretty {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    }
}
