//! TaskStore port - 正本（source of truth）
//!
//! TaskStore は以下を管理します：
//! - タスク（状態、due、前提タスク一覧）
//! - 実行履歴（ExecutionRecord、append-only）
//! - カテゴリ（参照データ）
//!
//! # 実装
//! - `InMemoryTaskStore`（テスト・組み込み用）
//! - `SqliteTaskStore`（永続化、再起動後も残る）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Category, CategoryId, ExecutionRecord, Result, Task, TaskId, TaskStatus,
};

/// TaskStore は状態・履歴・依存の正本
///
/// # 設計原則
/// - 状態遷移は compare-and-swap（`expected` と一致した時だけ更新）
/// - CAS が scheduler インスタンス間の唯一の排他。分散ロックは使わない
/// - 依存グラフはここから再構築できる（`Task::prerequisites`）
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task. Its id must not exist yet.
    async fn create(&self, task: Task) -> Result<TaskId>;

    /// `TaskNotFound` if the id is unknown.
    async fn get(&self, id: TaskId) -> Result<Task>;

    /// Set `status = new` iff the stored status equals `expected`.
    ///
    /// Errors: `TaskNotFound`, or `Conflict` carrying the actual status.
    async fn update_status(&self, id: TaskId, new: TaskStatus, expected: TaskStatus)
    -> Result<()>;

    /// Overwrite the whole record iff the stored status equals `expected`.
    async fn replace(&self, task: &Task, expected: TaskStatus) -> Result<()>;

    /// `Pending` tasks with `due_at <= as_of`, earliest first.
    async fn list_due(&self, as_of: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Everything not `Completed` / `Failed` / `Cancelled`.
    async fn list_non_terminal(&self) -> Result<Vec<Task>>;

    async fn list_all(&self) -> Result<Vec<Task>>;

    async fn delete(&self, id: TaskId) -> Result<()>;

    async fn append_execution_record(&self, record: ExecutionRecord) -> Result<()>;

    /// Execution records of one task, in append order.
    async fn history(&self, id: TaskId) -> Result<Vec<ExecutionRecord>>;

    async fn create_category(&self, category: Category) -> Result<CategoryId>;

    async fn get_category(&self, id: CategoryId) -> Result<Category>;

    async fn list_categories(&self) -> Result<Vec<Category>>;
}
