use thiserror::Error;

use crate::types::JobStatus;

/// Errors that can occur within the scheduler subsystem.
///
/// Script failures are not errors: they are recorded on the
/// [`crate::ExecutionRecord`] and end the job in `ENDED_FAILED`.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A job definition is missing a required field or has an invalid value.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// The job was not in the state the operation requires, usually a lost
    /// race between the poller and a manual run.
    #[error("Conflict on job {id}: {reason} (status is {status})")]
    Conflict {
        id: String,
        status: JobStatus,
        reason: String,
    },

    /// The requested status change is not an edge of the state machine.
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Recurrence arithmetic left the representable time range.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// Short error code string for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::Validation(_) => "VALIDATION_ERROR",
            SchedulerError::JobNotFound { .. } => "NOT_FOUND",
            SchedulerError::Conflict { .. } => "CONFLICT",
            SchedulerError::InvalidTransition { .. } => "INVALID_TRANSITION",
            SchedulerError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            SchedulerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// The database was busy or locked by another connection; retrying the
    /// same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedulerError::Database(rusqlite::Error::SqliteFailure(e, _))
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
        )
    }

    pub(crate) fn conflict(id: &str, status: JobStatus, reason: impl Into<String>) -> Self {
        SchedulerError::Conflict {
            id: id.to_string(),
            status,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
