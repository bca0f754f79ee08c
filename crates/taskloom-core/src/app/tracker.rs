//! ExecutionTracker - 試行回数の管理と実行履歴の記録
//!
//! 試行の結果を ExecutionRecord として TaskStore に追記し、
//! Decider に次のアクション（完了 / リトライ / 諦め）を問い合わせる。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::domain::{Decider, Decision, ExecutionRecord, Outcome, Result, Task, TaskId};
use crate::ports::{Clock, TaskStore};

/// ExecutionTracker は occurrence ごとの試行回数を数える
///
/// # 不変条件
/// - 試行番号は永続化された `retry_count + 1`（正本は TaskStore）
/// - 同じストアを共有する他インスタンスがリトライや完了をしても数え間違えない
/// - メモリ上の表は観測用のみ。新しい occurrence に入る時は `reset` で消す
pub struct ExecutionTracker {
    store: Arc<dyn TaskStore>,
    decider: Arc<dyn Decider>,
    clock: Arc<dyn Clock>,
    attempts: Mutex<HashMap<TaskId, u32>>,
}

impl ExecutionTracker {
    pub fn new(store: Arc<dyn TaskStore>, decider: Arc<dyn Decider>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            decider,
            clock,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Count one attempt of `task` and append its ExecutionRecord.
    pub async fn record_attempt(
        &self,
        task: &Task,
        outcome: &Outcome,
        started_at: DateTime<Utc>,
    ) -> Result<ExecutionRecord> {
        let attempt = task.retry_count.saturating_add(1);
        self.lock().insert(task.id, attempt);

        let record = ExecutionRecord::new(task.id, attempt, started_at, self.clock.now(), outcome);
        self.store.append_execution_record(record.clone()).await?;

        tracing::info!(
            task = %task.id,
            attempt,
            outcome = outcome.kind.as_str(),
            detail = outcome.detail.as_deref().unwrap_or(""),
            elapsed_ms = record.duration().num_milliseconds(),
            "attempt recorded"
        );
        Ok(record)
    }

    /// Next action after the attempt described by `record`.
    pub fn decide(&self, record: &ExecutionRecord, outcome: &Outcome) -> Decision {
        self.decider.decide(record.attempt, outcome)
    }

    /// Forget the counter, e.g. when a new occurrence starts.
    pub fn reset(&self, task_id: TaskId) {
        self.lock().remove(&task_id);
    }

    /// Latest attempt this instance recorded for the current occurrence of
    /// `task_id`.
    pub fn attempts(&self, task_id: TaskId) -> u32 {
        self.lock().get(&task_id).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, u32>> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }
}
