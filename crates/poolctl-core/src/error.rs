//! # Design
//!
//! - Keep error messages constant where the caller only needs the category.
//! - Carry the operation identifier so logs say which admin call failed.
//! - `toast_message` is the single place that turns an error into operator text.

use std::error::Error as StdError;

use thiserror::Error;

/// Toast text for a dropped or failed progress stream.
pub const MSG_CONNECTION_LOST: &str = "连接中断";

/// Result alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors raised by the record store, the session and admin backends.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Input was rejected before any network call.
    #[error("{message}")]
    Validation {
        /// Field or argument that failed validation.
        field: &'static str,
        /// Operator-facing description.
        message: String,
    },
    /// A token being added already exists in the store.
    #[error("token already exists")]
    Duplicate {
        /// Offending credential.
        token: String,
    },
    /// The addressed token is not in the store.
    #[error("token not found")]
    NotFound {
        /// Missing credential.
        token: String,
    },
    /// The admin key was rejected; the session must log in again.
    #[error("admin key rejected")]
    Unauthorized {
        /// Operation identifier.
        operation: &'static str,
    },
    /// The request never produced an HTTP response.
    #[error("connection failed")]
    Transport {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying transport error.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    /// The server answered with a non-success status.
    #[error("request failed with status {status}")]
    HttpStatus {
        /// Operation identifier.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
        /// Message extracted from the error body, when present.
        message: Option<String>,
    },
    /// The response body could not be decoded as JSON.
    #[error("响应不是有效 JSON (HTTP {status})")]
    InvalidJson {
        /// Operation identifier.
        operation: &'static str,
        /// HTTP status code of the undecodable response.
        status: u16,
    },
    /// The server accepted the request but reported a failure in the body.
    #[error("server rejected the request")]
    Rejected {
        /// Operation identifier.
        operation: &'static str,
        /// Status or message reported by the server.
        detail: String,
    },
    /// Batch job admission or lifecycle rule was violated.
    #[error(transparent)]
    Batch(#[from] BatchError),
}

impl PoolError {
    /// Convenience constructor for validation failures.
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Wrap a transport-level failure.
    pub fn transport(
        operation: &'static str,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Transport {
            operation,
            source: source.into(),
        }
    }

    /// True when the failure should end the admin session.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Operator-facing message for the toast layer.
    #[must_use]
    pub fn toast_message(&self) -> String {
        match self {
            Self::Validation { message, .. } => message.clone(),
            Self::Duplicate { token } => format!("token already exists: {token}"),
            Self::NotFound { token } => format!("token not found: {token}"),
            Self::Unauthorized { .. } => "admin key rejected; log in again".to_string(),
            Self::Transport { source, .. } => format!("{MSG_CONNECTION_LOST}: {source}"),
            Self::HttpStatus {
                status, message, ..
            } => message.as_ref().map_or_else(
                || format!("request failed (HTTP {status})"),
                |message| format!("{message} (HTTP {status})"),
            ),
            Self::InvalidJson { .. } | Self::Batch(_) => self.to_string(),
            Self::Rejected { detail, .. } => format!("server rejected the request: {detail}"),
        }
    }
}

/// Batch job admission and lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// Another batch job is still active.
    #[error("a batch job is already running")]
    Busy {
        /// Task identifier of the active job, when server-side.
        task_id: Option<String>,
    },
    /// The batch was requested without any selected token.
    #[error("no tokens selected")]
    EmptySelection,
    /// The operation needs a running job but none is active.
    #[error("no batch job is running")]
    NotRunning,
    /// The server accepted the batch but did not return a task id.
    #[error("server did not return a task id")]
    MissingTaskId,
}
