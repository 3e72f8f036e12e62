//! `courtlistener-mcp` binary
//!
//! Reads authorization settings from the environment, then serves the MCP
//! endpoint and the OAuth endpoints until interrupted.

mod app;
mod cli;
mod logging;

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use courtlistener_auth::AuthConfig;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format, cli.default_log_level())?;

    let config = AuthConfig::from_env().context("invalid authorization configuration")?;
    let app = app::build(config).context("failed to assemble application")?;

    let grants = app.grants.clone();
    let purge_every = Duration::from_secs(cli.purge_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(purge_every);
        loop {
            ticker.tick().await;
            let purged = grants.purge_expired();
            if purged > 0 {
                debug!(purged, remaining = grants.len(), "Purged expired grants");
            }
        }
    });

    let listener = TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;
    info!(addr = %cli.bind, version = env!("CARGO_PKG_VERSION"), "courtlistener-mcp listening");

    axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received Ctrl+C, shutting down");
    }
}
