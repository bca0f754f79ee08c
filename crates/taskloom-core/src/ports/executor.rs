//! Executor port - タスクの実際の処理
//!
//! The scheduler never knows what a task *does*. It hands the task (and its
//! opaque `payload`) to an Executor and records the Outcome.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{Outcome, Task};

/// Executor はタスクを実行して Outcome を返す
///
/// # 使用例
/// ```ignore
/// struct PrintExecutor;
///
/// #[async_trait]
/// impl Executor for PrintExecutor {
///     async fn run(&self, task: &Task, _cancel: CancellationToken) -> Outcome {
///         println!("running {}", task.title);
///         Outcome::success()
///     }
/// }
/// ```
///
/// # Cancellation
/// May be long-running. Implementations must watch `cancel` and return
/// `Outcome::cancelled()` promptly once it fires. The scheduler also stops
/// awaiting a cancelled run on its own, so an executor that ignores the
/// token only leaks its own work.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, task: &Task, cancel: CancellationToken) -> Outcome;
}
