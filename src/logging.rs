//! Tracing setup for the daemon and the CLI.
//!
//! Everything at the configured level goes to stderr. WARN and above are also
//! appended to the failure log, which is where detached transfer sessions
//! report how they ended.

use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::{PeerShareError, Result};

/// Builds the stderr filter. `RUST_LOG` wins over `verbose`.
pub fn default_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("peershare={}", level)))
}

/// Installs the global subscriber. Fails if one is already installed or the
/// failure log cannot be opened.
pub fn init_logging(verbose: bool, failure_log: Option<&Path>) -> Result<()> {
    let console = fmt::layer()
        .with_target(true)
        .with_file(verbose)
        .with_line_number(verbose)
        .with_filter(default_filter(verbose));

    let failures = match failure_log {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true)
                    .with_filter(LevelFilter::WARN),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(failures)
        .try_init()
        .map_err(|e| PeerShareError::Config(format!("Logging already initialized: {}", e)))?;

    Ok(())
}
