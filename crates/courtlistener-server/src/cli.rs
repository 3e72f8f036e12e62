//! Command-line interface
//!
//! Every flag can also come from the environment, so container deployments
//! need no arguments at all. Authorization settings are read separately by
//! [`courtlistener_auth::AuthConfig::from_env`].

use std::net::SocketAddr;

use clap::{Parser, ValueEnum};

/// CourtListener MCP server
#[derive(Parser, Debug)]
#[command(
    name = "courtlistener-mcp",
    version,
    about = "CourtListener legal-research MCP server with OAuth 2.1 authorization",
    author
)]
pub struct Cli {
    /// Address to listen on
    #[arg(long, env = "MCP_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Log output format
    #[arg(long, env = "MCP_LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Enable verbose logging (-v, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// How often expired grants are purged, in seconds
    #[arg(long, env = "MCP_GRANT_PURGE_INTERVAL_SECS", default_value_t = 60)]
    pub purge_interval_secs: u64,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

impl Cli {
    /// Default filter directive when `RUST_LOG` is unset
    pub fn default_log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
