//! Operator notifications.
//!
//! Every toast is also emitted as a tracing event under [`TOAST_LOG_TARGET`];
//! front ends that print toasts themselves can filter that target out.

use std::fmt::{self, Display, Formatter};

use serde::Serialize;
use tracing::{error, info, warn};

/// Tracing target toasts are logged under.
pub const TOAST_LOG_TARGET: &str = "poolctl::toast";

/// Toast text when the operator stops a running batch.
pub const MSG_CANCELLED: &str = "已终止";

/// Severity of a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    /// Operation succeeded.
    Success,
    /// Informational.
    Info,
    /// Completed with caveats.
    Warning,
    /// Operation failed.
    Error,
}

impl Display for ToastLevel {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Success => "success",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// One notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    /// Severity.
    pub level: ToastLevel,
    /// Operator-facing text.
    pub message: String,
}

impl Toast {
    /// Build a toast and log it at the matching level.
    pub fn emit(level: ToastLevel, message: impl Into<String>) -> Self {
        let message = message.into();
        match level {
            ToastLevel::Success | ToastLevel::Info => info!(target: TOAST_LOG_TARGET, toast = %level, "{message}"),
            ToastLevel::Warning => warn!(target: TOAST_LOG_TARGET, toast = %level, "{message}"),
            ToastLevel::Error => error!(target: TOAST_LOG_TARGET, toast = %level, "{message}"),
        }
        Self { level, message }
    }
}

/// Toasts accumulated since the caller last drained them.
#[derive(Debug, Default)]
pub struct Toasts {
    pending: Vec<Toast>,
}

impl Toasts {
    /// Queue a toast.
    pub fn push(&mut self, level: ToastLevel, message: impl Into<String>) {
        self.pending.push(Toast::emit(level, message));
    }

    /// Take every pending toast.
    pub fn drain(&mut self) -> Vec<Toast> {
        std::mem::take(&mut self.pending)
    }

    /// Pending toasts, oldest first.
    #[must_use]
    pub fn pending(&self) -> &[Toast] {
        &self.pending
    }
}
