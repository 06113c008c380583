//! Telemetry error type.

use thiserror::Error;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Failures while configuring logging.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber")]
    SubscriberInstall {
        /// Error reported by `tracing-subscriber`.
        #[source]
        source: tracing_subscriber::util::TryInitError,
    },
    /// The level/filter string could not be parsed.
    #[error("invalid log filter '{directives}'")]
    InvalidFilter {
        /// Directives as supplied.
        directives: String,
        /// Parser error.
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    /// The log format name was not recognised.
    #[error("unknown log format '{value}' (expected json or pretty)")]
    UnknownFormat {
        /// Name as supplied.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn messages_name_the_offending_input() {
        let err = TelemetryError::UnknownFormat {
            value: "xml".into(),
        };
        assert_eq!(err.to_string(), "unknown log format 'xml' (expected json or pretty)");
        assert!(err.source().is_none());
    }
}
