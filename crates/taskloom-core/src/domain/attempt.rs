//! Execution history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::outcome::{Outcome, OutcomeKind};

/// A single execution attempt of a task.
///
/// Immutable once written. The store keeps these append-only per task, which
/// is what lets the CLI explain why a task ended up `FAILED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub task_id: TaskId,

    /// 1-indexed attempt number within the current occurrence.
    pub attempt: u32,

    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: OutcomeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ExecutionRecord {
    pub fn new(
        task_id: TaskId,
        attempt: u32,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        outcome: &Outcome,
    ) -> Self {
        Self {
            task_id,
            attempt,
            started_at,
            ended_at,
            outcome: outcome.kind,
            detail: outcome.detail.clone(),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}
