//! Subscriber setup for binaries embedding the engine.

use tracing_subscriber::EnvFilter;

use crate::error::{AppError, Result};

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "APPVIRT_LOG";

/// Install a global `fmt` subscriber filtered by `APPVIRT_LOG`
/// (default `info`). Fails if a subscriber is already installed.
pub fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| AppError::Logging {
            message: e.to_string(),
        })
}
