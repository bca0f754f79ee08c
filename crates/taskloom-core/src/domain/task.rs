//! Task and Category records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::{CategoryId, TaskId};
use super::recurrence::RecurrenceRule;

/// Task status.
///
/// State transitions:
/// - Pending -> Ready -> Running -> Completed
/// - Pending -> Ready -> Running -> Pending (retry with backoff, or next occurrence)
/// - Pending -> Ready -> Running -> Failed (max attempts exceeded)
/// - Pending -> Cancelled
///
/// `Ready` means one scheduler instance has claimed the occurrence and is
/// waiting for an execution slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Ready => "READY",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "READY" => Ok(TaskStatus::Ready),
            "RUNNING" => Ok(TaskStatus::Running),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            "CANCELLED" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// A schedulable unit of work.
///
/// Design:
/// - The store owns this record; it is the single source of truth.
/// - `prerequisites` is durable. The dependency graph is rebuilt from it.
/// - `payload` is opaque to the scheduler and handed to the executor as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub category: Option<CategoryId>,
    pub recurrence: RecurrenceRule,

    /// When the current occurrence becomes due (or the next retry, after a failure).
    pub due_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub prerequisites: Vec<TaskId>,

    /// Failed attempts of the current occurrence.
    pub retry_count: u32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn from_new(id: TaskId, new: NewTask, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: new.title,
            category: new.category,
            recurrence: new.recurrence,
            due_at: new.due_at,
            status: TaskStatus::Pending,
            prerequisites: new.prerequisites,
            retry_count: 0,
            last_run_at: None,
            last_completed_at: None,
            payload: new.payload,
            created_at,
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self.recurrence, RecurrenceRule::None)
    }

    /// Due task: `Pending` and `due_at <= now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.due_at <= now
    }

    /// Status as seen by tasks that depend on this one.
    ///
    /// A recurring task never stays `Completed`: it goes back to `Pending` for
    /// its next occurrence. Once it has completed at least one occurrence it
    /// satisfies its dependents.
    pub fn status_for_dependents(&self) -> TaskStatus {
        if self.is_recurring() && self.last_completed_at.is_some() {
            TaskStatus::Completed
        } else {
            self.status
        }
    }
}

/// Creation input for a task.
///
/// ```ignore
/// let new = NewTask::interval("stand up", 25 * 60, now)
///     .in_category(focus)
///     .with_prerequisite(setup);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub category: Option<CategoryId>,
    pub recurrence: RecurrenceRule,
    pub due_at: DateTime<Utc>,
    #[serde(default)]
    pub prerequisites: Vec<TaskId>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl NewTask {
    /// One-shot task due at `due_at`.
    pub fn once(title: impl Into<String>, due_at: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            category: None,
            recurrence: RecurrenceRule::None,
            due_at,
            prerequisites: Vec::new(),
            payload: serde_json::Value::Null,
        }
    }

    /// Recurring task, first due at `first_due`, then every `every_secs`.
    pub fn interval(title: impl Into<String>, every_secs: u64, first_due: DateTime<Utc>) -> Self {
        Self {
            recurrence: RecurrenceRule::Interval { every_secs },
            ..Self::once(title, first_due)
        }
    }

    /// Cron-scheduled task, first due at `first_due`.
    pub fn cron(
        title: impl Into<String>,
        expression: impl Into<String>,
        first_due: DateTime<Utc>,
    ) -> Self {
        Self {
            recurrence: RecurrenceRule::CronLike {
                expression: expression.into(),
            },
            ..Self::once(title, first_due)
        }
    }

    pub fn with_prerequisite(mut self, prerequisite: TaskId) -> Self {
        if !self.prerequisites.contains(&prerequisite) {
            self.prerequisites.push(prerequisite);
        }
        self
    }

    pub fn in_category(mut self, category: CategoryId) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Grouping metadata. No behaviour attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
}
