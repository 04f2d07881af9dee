//! Structured logging setup.
//!
//! Console output is pretty-printed by default or JSON with `LOG_JSON=true`.
//! `LOG_FILE` adds a daily-rotated JSON file. `RUST_LOG` overrides the
//! default filter of `dex_state_sync=info,warn`.
//!
//! ```no_run
//! use dex_state_sync::observability;
//!
//! let _guard = observability::init_tracing(None, None, false)?;
//! # Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default filter: info for this crate, warn for dependencies.
pub const DEFAULT_FILTER: &str = "dex_state_sync=info,warn";

fn build_filter(log_level: Option<String>) -> EnvFilter {
    std::env::var("RUST_LOG")
        .ok()
        .or(log_level)
        .map_or_else(|| EnvFilter::new(DEFAULT_FILTER), EnvFilter::new)
}

/// Install the global tracing subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process when `log_file` is set.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or a subscriber
/// is already installed.
pub fn init_tracing(
    log_level: Option<String>,
    log_file: Option<PathBuf>,
    json_output: bool,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = build_filter(log_level);

    let console_layer = if json_output {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let (file_layer, guard) = match log_file.as_deref() {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(
                dir,
                path.file_name().unwrap_or_else(|| OsStr::new("dex-state-sync.log")),
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(json_output, file_logging = log_file.is_some(), "Tracing initialized");
    Ok(guard)
}

/// Subscriber writing to the test harness at debug level.
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
