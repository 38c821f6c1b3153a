use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use opslog::{router, AppState};
use opslog_core::config::Config;
use opslog_core::Pipeline;

#[derive(Parser)]
#[command(name = "opslog", about = "Operational log ingestion, volume alerts, and export")]
struct Cli {
    /// Config file (defaults to ~/.config/opslog/config.toml; missing is fine).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overriding `[server] bind`.
    #[arg(long)]
    bind: Option<String>,

    /// Default the log filter to `debug` instead of `info`.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let sink = opslog_alert::sink_from_config(&config.guard)?;
    let pipeline = Arc::new(Pipeline::new(&config, sink));
    let state = AppState::new(pipeline, &config.arbiter);

    let bind = cli.bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        logs_dir = %config.storage.logs_dir.display(),
        "opslog listening"
    );

    axum::serve(listener, router(state)).await?;
    Ok(())
}
