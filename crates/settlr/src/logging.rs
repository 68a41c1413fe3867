//! Process-wide logging setup.
//!
//! Library code logs through `log` macros and `tracing` spans; this module
//! installs one `tracing-subscriber` pipeline and bridges `log` records into it.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt as fmt_layer, EnvFilter, Registry};

use crate::error::SettlrError;

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Builds the filter from `directives`, then `RUST_LOG`, then `info`.
fn build_filter(directives: Option<&str>) -> EnvFilter {
    if let Some(directives) = directives {
        if let Ok(filter) = EnvFilter::try_new(directives) {
            return filter;
        }
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(Level::INFO.into())
            .parse_lossy("")
    })
}

/// Installs the global subscriber. Calling it again is a no-op.
pub fn init(directives: Option<&str>, format: LogFormat) -> Result<(), SettlrError> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    // Fails only if another `log` logger is already installed.
    if let Err(e) = tracing_log::LogTracer::init() {
        return Err(SettlrError::Logging(e.to_string()));
    }

    let filter = build_filter(directives);
    let result = match format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            Registry::default().with(filter).with(
                fmt_layer::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true),
            ),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            Registry::default()
                .with(filter)
                .with(fmt_layer::layer().with_target(true).with_thread_names(true)),
        ),
    };
    result.map_err(|e| SettlrError::Logging(e.to_string()))?;

    let _ = INITIALIZED.set(());
    Ok(())
}
