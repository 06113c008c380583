//! Batch job state machine.
//!
//! # Design
//! - `BatchState` is a tagged union so a task id only exists while a job does.
//! - Transitions are pure; the session performs the I/O around them.
//! - Progress is monotone within a job; a late or reordered frame never moves
//!   the bar backwards.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use poolctl_models::BatchSummary;
use serde::Serialize;

use crate::error::{BatchError, PoolError};

/// Operation applied to every selected token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchAction {
    /// Server-side validity refresh, tracked over SSE.
    Refresh,
    /// Server-side NSFW enablement, tracked over SSE.
    NsfwEnable,
    /// Client-local removal followed by a full replace.
    Delete,
    /// Client-local status change followed by a full replace.
    Disable,
}

impl BatchAction {
    /// Every action, in CLI order.
    pub const ALL: [Self; 4] = [Self::Refresh, Self::NsfwEnable, Self::Delete, Self::Disable];

    /// True when the server runs the job and reports progress over SSE.
    #[must_use]
    pub const fn is_server_side(self) -> bool {
        matches!(self, Self::Refresh | Self::NsfwEnable)
    }

    /// True when the action removes or disables credentials.
    #[must_use]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::Delete | Self::Disable)
    }

    /// CLI label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Refresh => "refresh",
            Self::NsfwEnable => "nsfw-enable",
            Self::Delete => "delete",
            Self::Disable => "disable",
        }
    }
}

impl Display for BatchAction {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for BatchAction {
    type Err = PoolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == wanted)
            .ok_or_else(|| {
                PoolError::validation("action", format!("unknown batch action '{value}'"))
            })
    }
}

/// Decoded progress-stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    /// Current counters sent when the stream opens.
    Snapshot {
        /// Tokens in the batch.
        total: u64,
        /// Tokens handled so far.
        processed: u64,
    },
    /// Incremental counters.
    Progress {
        /// Tokens in the batch.
        total: u64,
        /// Tokens handled so far.
        processed: u64,
    },
    /// The job completed.
    Done {
        /// Tokens in the batch.
        total: u64,
        /// Success and failure counts, when reported.
        summary: Option<BatchSummary>,
        /// Non-fatal warning.
        warning: Option<String>,
    },
    /// The job was cancelled server-side.
    Cancelled,
    /// The job failed.
    Error {
        /// Failure description.
        message: String,
    },
}

impl BatchEvent {
    /// True for `done`, `cancelled` and `error`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Cancelled | Self::Error { .. })
    }
}

/// A running job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchJob {
    /// Server task id; empty for client-local jobs.
    pub task_id: String,
    /// Action being applied.
    pub action: BatchAction,
    /// Tokens in the batch.
    pub total: u64,
    /// Tokens handled so far.
    pub processed: u64,
}

impl BatchJob {
    /// `floor(processed * 100 / total)` clamped to 100; 0 when `total == 0`.
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let percent = u128::from(self.processed) * 100 / u128::from(self.total);
        u8::try_from(percent.min(100)).unwrap_or(100)
    }

    fn record_progress(&mut self, total: u64, processed: u64) {
        if total > 0 {
            self.total = total;
        }
        self.processed = self.processed.max(processed);
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Completed; may still carry a warning or failures.
    Done {
        /// Success and failure counts, when reported.
        summary: Option<BatchSummary>,
        /// Non-fatal warning.
        warning: Option<String>,
    },
    /// Stopped by the operator or the server.
    Cancelled,
    /// Failed.
    Error {
        /// Failure description.
        message: String,
    },
}

impl BatchOutcome {
    /// Completed with a warning or at least one failed token.
    #[must_use]
    pub fn needs_attention(&self) -> bool {
        match self {
            Self::Done { summary, warning } => {
                warning.as_deref().is_some_and(|text| !text.trim().is_empty())
                    || summary.is_some_and(|summary| summary.fail > 0)
            }
            Self::Cancelled | Self::Error { .. } => false,
        }
    }
}

/// Lifecycle of the single batch slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BatchState {
    /// No job.
    #[default]
    Idle,
    /// The start request is in flight.
    Starting {
        /// Action being started.
        action: BatchAction,
        /// Selected tokens.
        total: u64,
    },
    /// The job is running.
    Running(BatchJob),
    /// The job ended; the session resets to `Idle` after reloading.
    Finished {
        /// Final counters.
        job: BatchJob,
        /// Terminal outcome.
        outcome: BatchOutcome,
    },
}

impl BatchState {
    /// True while a job occupies the slot.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Starting { .. } | Self::Running(_))
    }

    /// The running or finished job.
    #[must_use]
    pub const fn job(&self) -> Option<&BatchJob> {
        match self {
            Self::Running(job) | Self::Finished { job, .. } => Some(job),
            Self::Idle | Self::Starting { .. } => None,
        }
    }

    /// Admit a new job.
    ///
    /// # Errors
    ///
    /// `Busy` while another job is active, `EmptySelection` when nothing is
    /// selected. The current state is left untouched on error.
    pub fn begin(&mut self, action: BatchAction, selected: usize) -> Result<(), BatchError> {
        match self {
            Self::Starting { .. } => return Err(BatchError::Busy { task_id: None }),
            Self::Running(job) => {
                return Err(BatchError::Busy {
                    task_id: Some(job.task_id.clone()).filter(|id| !id.is_empty()),
                });
            }
            Self::Idle | Self::Finished { .. } => {}
        }
        if selected == 0 {
            return Err(BatchError::EmptySelection);
        }
        *self = Self::Starting {
            action,
            total: u64::try_from(selected).unwrap_or(u64::MAX),
        };
        Ok(())
    }

    /// The start request was accepted.
    ///
    /// # Errors
    ///
    /// `NotRunning` unless the state is `Starting`.
    pub fn started(&mut self, task_id: impl Into<String>, total: Option<u64>) -> Result<(), BatchError> {
        let Self::Starting {
            action,
            total: selected,
        } = *self
        else {
            return Err(BatchError::NotRunning);
        };
        *self = Self::Running(BatchJob {
            task_id: task_id.into(),
            action,
            total: total.filter(|total| *total > 0).unwrap_or(selected),
            processed: 0,
        });
        Ok(())
    }

    /// Apply a stream event. Returns the outcome when the event is terminal.
    ///
    /// Events outside `Running` are ignored.
    pub fn apply(&mut self, event: BatchEvent) -> Option<BatchOutcome> {
        let Self::Running(job) = self else {
            return None;
        };
        match event {
            BatchEvent::Snapshot { total, processed } | BatchEvent::Progress { total, processed } => {
                job.record_progress(total, processed);
                None
            }
            BatchEvent::Done {
                total,
                summary,
                warning,
            } => {
                if total > 0 {
                    job.total = total;
                }
                job.processed = job.total;
                self.finish(BatchOutcome::Done { summary, warning })
            }
            BatchEvent::Cancelled => self.finish(BatchOutcome::Cancelled),
            BatchEvent::Error { message } => self.finish(BatchOutcome::Error { message }),
        }
    }

    /// Move an active job to `Finished`. Returns `None` when no job is active.
    pub fn finish(&mut self, outcome: BatchOutcome) -> Option<BatchOutcome> {
        let job = match std::mem::take(self) {
            Self::Running(job) => job,
            Self::Starting { action, total } => BatchJob {
                task_id: String::new(),
                action,
                total,
                processed: 0,
            },
            other => {
                *self = other;
                return None;
            }
        };
        *self = Self::Finished {
            job,
            outcome: outcome.clone(),
        };
        Some(outcome)
    }

    /// Drop the finished job and return to `Idle`.
    pub fn reset(&mut self) -> Option<(BatchJob, BatchOutcome)> {
        match std::mem::take(self) {
            Self::Finished { job, outcome } => Some((job, outcome)),
            other => {
                *self = other;
                None
            }
        }
    }
}
