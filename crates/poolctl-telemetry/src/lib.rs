#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(unreachable_pub, clippy::all, clippy::pedantic)]

//! Logging primitives shared across the poolctl workspace.
//!
//! Layout:
//! - `init.rs`: subscriber installation and logging configuration
//! - `context.rs`: command-level span helpers
//! - `error.rs`: telemetry error type

pub mod context;
pub mod error;
pub mod init;

pub use context::command_span;
pub use error::{Result, TelemetryError};
pub use init::{
    DEFAULT_LOG_LEVEL, LOG_ENV_VAR, LogFormat, LoggingConfig, build_env_filter, build_sha,
    init_logging,
};
