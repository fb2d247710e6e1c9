//! Error types for the tickr-executor crate.
//!
//! These never escape [`crate::ScriptExecutor::run`]; they are rendered into
//! the diagnostic line appended to a failed run's stderr.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    /// The interpreter could not be started (missing binary, permissions).
    #[error("failed to launch `{program}`: {reason}")]
    Launch { program: String, reason: String },

    /// Reading the child's output or waiting on it failed.
    #[error("I/O error while waiting for script: {0}")]
    Io(#[from] std::io::Error),

    /// The watchdog killed the child.
    #[error("script timed out after {ms}ms and was killed")]
    Timeout { ms: u64 },

    /// The task driving the child went away without reporting.
    #[error("wait task ended unexpectedly")]
    WaitAborted,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ExecError>;
