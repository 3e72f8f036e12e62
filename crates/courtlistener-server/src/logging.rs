//! Logging initialization
//!
//! Logs go to stderr. `RUST_LOG` overrides the verbosity chosen on the
//! command line.

use anyhow::anyhow;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogFormat;

/// Install the global subscriber
///
/// # Errors
///
/// Fails if a subscriber is already installed.
pub fn init(format: LogFormat, default_level: &str) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    }
    .map_err(|e| anyhow!("failed to initialize logging: {e}"))
}
