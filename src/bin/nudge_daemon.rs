//! Reminder daemon.
//!
//! Loads `config.toml` (path from `NUDGE_CONFIG`, else the platform config
//! dir), runs the scheduler and optional callback server, and stops cleanly
//! on Ctrl-C. Logs go to stderr; filter with `RUST_LOG`.

use std::path::PathBuf;

use anyhow::Context;
use nudge::callback::CallbackServer;
use nudge::{NudgeConfig, NudgeService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var_os("NUDGE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(NudgeConfig::default_config_path);
    let config = NudgeConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    tracing::info!(config = %config_path.display(), "nudge-daemon starting");

    let service = NudgeService::open(config).context("opening reminder service")?;

    let callback = if service.config().callback.enabled {
        Some(
            CallbackServer::start(service.callback_app(), &service.config().callback)
                .await
                .context("starting callback server")?,
        )
    } else {
        None
    };

    let scheduler = service.scheduler().spawn();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("shutdown requested");

    scheduler.stop().await;
    if let Some(server) = callback {
        server.shutdown();
    }

    tracing::info!("nudge-daemon shut down cleanly");
    Ok(())
}
