//! `tracing` subscriber setup for binaries and test harnesses embedding cogflow.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Installs a global subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns false if a subscriber was already installed; calling this more
/// than once is harmless.
pub fn init_tracing(format: LogFormat) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    install(format, filter)
}

/// Installs a global subscriber with an explicit filter directive.
///
/// # Errors
///
/// Returns an error if the directive cannot be parsed.
pub fn init_tracing_with_filter(format: LogFormat, directive: &str) -> Result<bool> {
    let filter = EnvFilter::try_new(directive)
        .with_context(|| format!("failed to parse log filter '{directive}'"))?;
    Ok(install(format, filter))
}

fn install(format: LogFormat, filter: EnvFilter) -> bool {
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .try_init(),
    };
    installed.is_ok()
}
