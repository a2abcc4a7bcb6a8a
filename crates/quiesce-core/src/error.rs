//! Error types for quiesce
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use crate::report::{BubbleReport, DeadlockReport};
use crate::task::{BubbleId, TaskId};
use thiserror::Error;

/// Result type alias for quiesce operations
pub type Result<T> = std::result::Result<T, Error>;

/// quiesce error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Harness Errors
    // =========================================================================
    #[error("Bubble usage error: {0}")]
    Usage(#[from] UsageError),

    #[error("Deadlock detected in {report}")]
    Deadlock {
        report: Box<DeadlockReport>,
        /// Run summary up to the failure (`Verdict::Deadlocked`)
        summary: Option<Box<BubbleReport>>,
    },

    #[error("Bubble step budget exceeded: {steps} polls, limit {limit}")]
    StepsExceeded { steps: u64, limit: u64 },

    #[error("Bubble time budget exceeded: {elapsed_ms}ms, limit {limit_ms}ms")]
    TimeExceeded { elapsed_ms: u64, limit_ms: u64 },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a deadlock error from a report
    pub fn deadlock(report: DeadlockReport) -> Self {
        Self::Deadlock {
            report: Box::new(report),
            summary: None,
        }
    }

    /// Create a deadlock error carrying the run summary as well
    pub fn deadlock_with_summary(report: DeadlockReport, summary: BubbleReport) -> Self {
        Self::Deadlock {
            report: Box::new(report),
            summary: Some(Box::new(summary)),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// The deadlock report, if this is a deadlock
    pub fn deadlock_report(&self) -> Option<&DeadlockReport> {
        match self {
            Self::Deadlock { report, .. } => Some(report),
            _ => None,
        }
    }

    /// The run summary of a deadlocked bubble, if one was recorded
    pub fn bubble_report(&self) -> Option<&BubbleReport> {
        match self {
            Self::Deadlock { summary, .. } => summary.as_deref(),
            _ => None,
        }
    }

    /// Whether this is a deadlock
    pub fn is_deadlock(&self) -> bool {
        matches!(self, Self::Deadlock { .. })
    }

    /// Whether this is a misuse of the bubble API
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}

/// Misuse of the bubble API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("cannot enter a bubble while {outer} is active on this thread")]
    NestedBubble { outer: BubbleId },

    #[error("cannot exit {bubble_id}: the root task is still blocked")]
    RootStillBlocked { bubble_id: BubbleId },

    #[error("{bubble_id} has already exited")]
    AlreadyExited { bubble_id: BubbleId },

    #[error("cannot spawn into {bubble_id}: the bubble is closed")]
    BubbleClosed { bubble_id: BubbleId },

    #[error("task {task} of {from} cannot spawn into {into}")]
    CrossBubbleSpawn {
        task: TaskId,
        from: BubbleId,
        into: BubbleId,
    },

    #[error("task name is {length} bytes, limit is {limit} bytes")]
    TaskNameTooLong { length: usize, limit: usize },

    #[error("{bubble_id} has {live} live tasks, limit is {limit}")]
    TooManyTasks {
        bubble_id: BubbleId,
        live: usize,
        limit: usize,
    },
}

/// Stream conditions surfaced to the task that issued a read
///
/// These are ordinary results for task logic to handle, not harness faults.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("end of stream")]
    EndOfStream,

    #[error("read cancelled")]
    Cancelled,

    #[error("stream aborted by peer")]
    Aborted,

    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Whether the stream reached its end normally
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}
