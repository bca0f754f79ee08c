//! NotificationHook port - 観測用のコールバック
//!
//! Delivery (mail, chat, push) is someone else's job. The default hook just
//! logs through `tracing`.

use crate::domain::{SchedulerError, Task};

/// NotificationHook は scheduler から呼ばれる観測用フック
///
/// - `on_terminal_failure`: 最大試行回数に達して `FAILED` になった時（1 回だけ）
/// - `on_recurrence_missed`: ダウンタイム等で発火を取りこぼし、1 回にまとめた時
pub trait NotificationHook: Send + Sync {
    fn on_terminal_failure(&self, task: &Task, error: &SchedulerError);

    fn on_recurrence_missed(&self, task: &Task, missed_count: u32);
}

/// Logs every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotificationHook;

impl NotificationHook for TracingNotificationHook {
    fn on_terminal_failure(&self, task: &Task, error: &SchedulerError) {
        tracing::error!(
            task = %task.id,
            title = %task.title,
            retry_count = task.retry_count,
            error = %error,
            "task failed permanently"
        );
    }

    fn on_recurrence_missed(&self, task: &Task, missed_count: u32) {
        tracing::warn!(
            task = %task.id,
            title = %task.title,
            missed = missed_count,
            next_due = %task.due_at,
            "collapsed missed occurrences into one"
        );
    }
}
