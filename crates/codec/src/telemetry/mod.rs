//! Structured logging setup.
//!
//! The codec emits JSON logs only; there is no trace or metrics export.
//!
//! # Telemetry invariants
//!
//! - **No key material or payload plaintext** may appear in any log field.
//!   Key ids and tags are safe to log.
//! - Log level is configurable via `KEYVAULT__LOG_LEVEL` (default: `info`);
//!   `RUST_LOG` takes precedence when set.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber.
///
/// Outputs structured JSON logs to stderr at the configured log level, keeping
/// stdout free for result documents.
///
/// # Errors
///
/// Returns an error if the subscriber has already been set.
pub fn init(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise tracing subscriber: {e}"))
}
