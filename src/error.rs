//! # Error types used by the process manager and its runners.
//!
//! Two enums partition the failure space:
//!
//! - [`RuntimeError`] errors raised by the manager itself (lifecycle misuse,
//!   closed submission channel).
//! - [`JobError`] errors raised while executing a single command (builtin
//!   failures, spawn errors, result encoding).
//!
//! Both types provide an `as_label` helper for logs/metrics. Note that a
//! failing *job* is not a [`JobError`] escaping anywhere: runners convert
//! failures into a terminal [`JobResult`](crate::result::JobResult) with
//! `state = ERROR` and the error text in `data`.

use thiserror::Error;

/// Errors produced by the process manager runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The manager was started more than once.
    #[error("process manager is already running")]
    AlreadyRunning,

    /// The submission channel is closed (manager shut down).
    #[error("command channel closed")]
    Closed,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::AlreadyRunning => "runtime_already_running",
            RuntimeError::Closed => "runtime_closed",
        }
    }
}

/// Errors produced while executing a single command.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum JobError {
    /// Generic execution failure with a human-readable reason.
    #[error("{reason}")]
    Failed { reason: String },

    /// The child process could not be spawned.
    #[error("spawn failed: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    /// A builtin return value could not be encoded into the result payload.
    #[error("encode failed: {source}")]
    Encode {
        #[from]
        source: serde_json::Error,
    },
}

impl JobError {
    /// Shorthand for [`JobError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        JobError::Failed {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            JobError::Failed { .. } => "job_failed",
            JobError::Spawn { .. } => "job_spawn",
            JobError::Encode { .. } => "job_encode",
        }
    }
}
