//! CLI entry point.
//!
//! ```text
//! main.rs (runtime + tracing)
//!     ↓
//! cli::run
//!     ↓
//! config → rpc (provider, reader, feed) → sync (registry) → pricing
//! ```
//!
//! Logging is controlled by `RUST_LOG`, `LOG_JSON` and `LOG_FILE`.

use dex_state_sync::{cli, observability};
use eyre::WrapErr;
use tracing::error;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let log_level = std::env::var("RUST_LOG").ok();
    let log_file = std::env::var("LOG_FILE").ok().map(std::path::PathBuf::from);
    let json_output = std::env::var("LOG_JSON")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);

    let _guard = observability::init_tracing(log_level, log_file, json_output)
        .map_err(|e| eyre::eyre!("Failed to initialize tracing: {e}"))?;

    if let Err(e) = cli::run().await {
        error!(error = %e, "Application error");
        return Err(e).wrap_err("dex-state-sync failed");
    }
    Ok(())
}
