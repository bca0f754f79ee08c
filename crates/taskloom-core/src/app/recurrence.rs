//! RecurrenceEngine - 次回発火時刻の計算
//!
//! # 方針
//! - 取りこぼした発火は 1 回にまとめる（バックログは作らない）
//! - 返す時刻は常に `after` より後
//! - 現在時刻は注入された Clock から取る

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::domain::{CronSchedule, RecurrenceRule, Result, SchedulerError};
use crate::ports::Clock;

/// Upper bound on fires counted while collapsing a cron backlog.
const MAX_COUNTED_MISSES: u32 = 10_000;

/// Next fire of a recurring task, with how many fires were skipped to get there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextFire {
    pub at: DateTime<Utc>,

    /// Fires in `(after, now]` that will never run.
    pub missed: u32,
}

/// RecurrenceEngine は RecurrenceRule から次回の due を計算する
///
/// # 使用例
/// ```ignore
/// let engine = RecurrenceEngine::new(clock);
/// let next = engine.next_fire(&task.recurrence, task.due_at)?;
/// ```
#[derive(Clone)]
pub struct RecurrenceEngine {
    clock: Arc<dyn Clock>,
}

impl RecurrenceEngine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// The next fire time after `after`.
    ///
    /// - `Interval`: `after + every`, moved forward to the first boundary
    ///   strictly after now when that is already in the past.
    /// - `CronLike`: first matching minute strictly after `after`.
    /// - `None`: no next occurrence.
    pub fn next_occurrence(
        &self,
        rule: &RecurrenceRule,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        match rule {
            RecurrenceRule::None => Ok(None),
            RecurrenceRule::Interval { every_secs } => {
                let now = self.clock.now();
                next_interval_fire(*every_secs, after, now).map(|fire| Some(fire.at))
            }
            RecurrenceRule::CronLike { expression } => {
                let schedule = CronSchedule::parse(expression)?;
                Ok(schedule.next_after(after))
            }
        }
    }

    /// Like `next_occurrence`, but collapses cron backlogs too and reports
    /// how many fires were skipped.
    ///
    /// `None` means the rule will never fire again.
    pub fn next_fire(&self, rule: &RecurrenceRule, after: DateTime<Utc>) -> Result<Option<NextFire>> {
        let now = self.clock.now();
        match rule {
            RecurrenceRule::None => Ok(None),
            RecurrenceRule::Interval { every_secs } => {
                next_interval_fire(*every_secs, after, now).map(Some)
            }
            RecurrenceRule::CronLike { expression } => {
                let schedule = CronSchedule::parse(expression)?;
                Ok(next_cron_fire(&schedule, after, now))
            }
        }
    }
}

fn next_interval_fire(every_secs: u64, after: DateTime<Utc>, now: DateTime<Utc>) -> Result<NextFire> {
    let every = i64::try_from(every_secs)
        .ok()
        .filter(|secs| *secs > 0)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| SchedulerError::Other(format!("invalid interval: {every_secs}s")))?;
    let overflow = || SchedulerError::Other(format!("next fire after {after} overflows"));

    let first = after.checked_add_signed(every).ok_or_else(overflow)?;
    if first > now {
        return Ok(NextFire { at: first, missed: 0 });
    }

    // boundaries after + k*every for k = 1..=n are all <= now
    let n = (now - after).num_seconds() / every.num_seconds();
    let at = after
        .checked_add_signed(every * i32::try_from(n + 1).map_err(|_| overflow())?)
        .ok_or_else(overflow)?;
    Ok(NextFire {
        at,
        missed: u32::try_from(n).unwrap_or(u32::MAX),
    })
}

fn next_cron_fire(schedule: &CronSchedule, after: DateTime<Utc>, now: DateTime<Utc>) -> Option<NextFire> {
    let mut cursor = schedule.next_after(after)?;
    let mut missed = 0u32;
    while cursor <= now {
        missed += 1;
        if missed >= MAX_COUNTED_MISSES {
            // stop counting, jump straight past now
            return schedule
                .next_after(now)
                .map(|at| NextFire { at, missed });
        }
        cursor = schedule.next_after(cursor)?;
    }
    Some(NextFire { at: cursor, missed })
}
