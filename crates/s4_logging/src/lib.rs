//! Shared logging setup for s4 binaries.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "s4_server=info,s4_protocol=info,s4_xfer=info";

/// Initialize tracing with a stderr layer and an append-only file under
/// the s4 home directory. `verbose` widens the stderr filter to match
/// the file filter; otherwise stderr shows warnings and above.
pub fn init_logging(app_name: &str, verbose: bool) -> Result<()> {
    let log_path = ensure_logs_dir()?.join(format!("{}.log", app_name));
    let file = Arc::new(
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open log file: {}", log_path.display()))?,
    );

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// The s4 home directory: `S4_HOME` or `~/.s4`.
pub fn s4_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("S4_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".s4")
}

/// Ensure `<s4 home>/logs` exists and return it.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = s4_home().join("logs");
    std::fs::create_dir_all(&logs)
        .with_context(|| format!("failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}
