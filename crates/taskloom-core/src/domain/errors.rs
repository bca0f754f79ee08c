//! Errors - エラー型と分類

use thiserror::Error;

use super::cron::CronError;
use super::ids::{CategoryId, TaskId};
use super::task::TaskStatus;

/// Operational classification of a [`SchedulerError`].
///
/// Only `Conflict` is retried transparently by the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    CycleDetected,
    ExecutionFailure,
    ExecutionTimeout,
    Invalid,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("category not found: {0}")]
    CategoryNotFound(CategoryId),

    /// Compare-and-swap mismatch. Re-read and retry, or abandon.
    #[error("status conflict on {task}: expected {expected}, found {actual}")]
    Conflict {
        task: TaskId,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("dependency {task} -> {prerequisite} would create a cycle")]
    CycleDetected { task: TaskId, prerequisite: TaskId },

    #[error("execution of {task} failed: {detail}")]
    ExecutionFailure { task: TaskId, detail: String },

    #[error("execution of {task} timed out: {detail}")]
    ExecutionTimeout { task: TaskId, detail: String },

    #[error("invalid recurrence: {0}")]
    InvalidRecurrence(#[from] CronError),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("task {task} still has {count} dependent task(s)")]
    HasDependents { task: TaskId, count: usize },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("background job failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Other(String),
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::TaskNotFound(_) | SchedulerError::CategoryNotFound(_) => {
                ErrorKind::NotFound
            }
            SchedulerError::Conflict { .. } => ErrorKind::Conflict,
            SchedulerError::CycleDetected { .. } => ErrorKind::CycleDetected,
            SchedulerError::ExecutionFailure { .. } => ErrorKind::ExecutionFailure,
            SchedulerError::ExecutionTimeout { .. } => ErrorKind::ExecutionTimeout,
            SchedulerError::InvalidRecurrence(_)
            | SchedulerError::AlreadyExists(_)
            | SchedulerError::HasDependents { .. } => ErrorKind::Invalid,
            SchedulerError::Storage(_)
            | SchedulerError::Serialization(_)
            | SchedulerError::Join(_)
            | SchedulerError::Other(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

pub type Result<T, E = SchedulerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_both_statuses() {
        let err = SchedulerError::Conflict {
            task: TaskId::new(1),
            expected: TaskStatus::Pending,
            actual: TaskStatus::Running,
        };
        let msg = err.to_string();
        assert!(msg.contains("PENDING"));
        assert!(msg.contains("RUNNING"));
        assert!(err.is_conflict());
    }

    #[test]
    fn kinds_are_classified() {
        assert_eq!(
            SchedulerError::TaskNotFound(TaskId::new(1)).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            SchedulerError::ExecutionTimeout {
                task: TaskId::new(1),
                detail: "30s".into()
            }
            .kind(),
            ErrorKind::ExecutionTimeout
        );
        assert_eq!(
            SchedulerError::from(CronError::ZeroInterval).kind(),
            ErrorKind::Invalid
        );
    }
}
