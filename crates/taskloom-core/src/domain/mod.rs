//! Domain model (ids, tasks, recurrence, outcomes, history, retry decisions).
//!
//! Nothing here does I/O; ports and app build on top of it.

pub mod attempt;
pub mod cron;
pub mod decision;
pub mod errors;
pub mod ids;
pub mod outcome;
pub mod recurrence;
pub mod retry;
pub mod task;

pub use attempt::ExecutionRecord;
pub use cron::{CronError, CronSchedule};
pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::{ErrorKind, Result, SchedulerError};
pub use ids::{CategoryId, TaskId};
pub use outcome::{Outcome, OutcomeKind};
pub use recurrence::RecurrenceRule;
pub use retry::RetryPolicy;
pub use task::{Category, NewTask, Task, TaskStatus};
