//! Server configuration, parsed from the command line.

use crate::storage::ReaperConfig;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "gedis",
    version,
    about = "gedis - in-memory key-value server speaking RESP"
)]
pub struct Config {
    /// Host to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Milliseconds between background expiry scans
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub reap_interval_ms: u64,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reaper_config(&self) -> ReaperConfig {
        ReaperConfig {
            interval: Duration::from_millis(self.reap_interval_ms),
        }
    }

    /// Default tracing filter directive for this crate.
    pub fn log_directive(&self) -> String {
        format!("gedis={}", self.log_level)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            reap_interval_ms: 1000,
            log_level: "info".to_string(),
        }
    }
}
