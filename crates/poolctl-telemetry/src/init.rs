//! Subscriber installation.
//!
//! # Design
//! - Logs always go to stderr; stdout is reserved for command output.
//! - Filter precedence: `POOLCTL_LOG`, then `RUST_LOG`, then the configured level.
//! - The build SHA is recorded once and read by every command span.

use std::io::{self, IsTerminal};
use std::str::FromStr;

use once_cell::sync::OnceCell;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Result, TelemetryError};

/// Level used when neither flags nor environment choose one.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV_VAR: &str = "POOLCTL_LOG";

static BUILD_SHA: OnceCell<String> = OnceCell::new();

/// Install the global subscriber for one process.
///
/// # Errors
///
/// `InvalidFilter` when `config.level` does not parse and no environment
/// filter overrides it; `SubscriberInstall` when a subscriber already exists.
pub fn init_logging(config: &LoggingConfig<'_>) -> Result<()> {
    // First initialisation wins.
    let _ = BUILD_SHA.set(config.build_sha.to_string());

    let filter = build_env_filter(config.level)?;
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(io::stderr().is_terminal());
    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry.with(layer.json().flatten_event(true)).try_init(),
        LogFormat::Pretty => registry.with(layer.compact()).try_init(),
    }
    .map_err(|source| TelemetryError::SubscriberInstall { source })
}

/// Filter from the environment, falling back to `level`.
///
/// # Errors
///
/// `InvalidFilter` when the fallback is used and does not parse.
pub fn build_env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_env(LOG_ENV_VAR).or_else(|_| EnvFilter::try_from_default_env()) {
        Ok(filter) => Ok(filter),
        Err(_) => parse_filter(level),
    }
}

fn parse_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives).map_err(|source| TelemetryError::InvalidFilter {
        directives: directives.to_string(),
        source,
    })
}

/// Build SHA recorded by [`init_logging`], or `dev`.
#[must_use]
pub fn build_sha() -> &'static str {
    BUILD_SHA.get().map_or("dev", String::as_str)
}

/// Settings for [`init_logging`].
#[derive(Debug, Clone)]
pub struct LoggingConfig<'a> {
    /// Filter directives such as `warn` or `info,poolctl::toast=off`.
    pub level: &'a str,
    /// Line format.
    pub format: LogFormat,
    /// Build identifier attached to command spans.
    pub build_sha: &'a str,
}

impl Default for LoggingConfig<'_> {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            format: LogFormat::infer(),
            build_sha: option_env!("POOLCTL_BUILD_SHA").unwrap_or("dev"),
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Compact human-readable lines.
    Pretty,
}

impl LogFormat {
    /// Pretty on an interactive terminal, JSON when stderr is captured.
    #[must_use]
    pub fn infer() -> Self {
        if io::stderr().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            _ => Err(TelemetryError::UnknownFormat {
                value: value.trim().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_names() {
        assert_eq!("JSON".parse::<LogFormat>().ok(), Some(LogFormat::Json));
        assert_eq!(" text ".parse::<LogFormat>().ok(), Some(LogFormat::Pretty));
        assert!(matches!(
            "xml".parse::<LogFormat>(),
            Err(TelemetryError::UnknownFormat { value }) if value == "xml"
        ));
    }

    #[test]
    fn toast_silencing_directive_parses() {
        assert!(parse_filter("warn,poolctl::toast=off").is_ok());
        assert!(matches!(
            parse_filter("poolctl=loudest"),
            Err(TelemetryError::InvalidFilter { directives, .. }) if directives == "poolctl=loudest"
        ));
    }

    #[test]
    fn build_sha_defaults_to_dev_before_init() {
        assert!(!build_sha().is_empty());
    }
}
