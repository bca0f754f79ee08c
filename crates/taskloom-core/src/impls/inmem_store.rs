//! InMemoryTaskStore - テスト・組み込み用の TaskStore
//!
//! # 実装詳細
//! - 全状態を 1 つの `tokio::sync::Mutex` の後ろに置く
//! - CAS はロックを握ったまま「読む → 比較 → 書く」を行う
//! - プロセス終了で消える。永続化が必要なら `SqliteTaskStore`

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    Category, CategoryId, ExecutionRecord, Result, SchedulerError, Task, TaskId, TaskStatus,
};
use crate::ports::TaskStore;

/// In-memory store state.
#[derive(Default)]
struct StoreState {
    /// All task records.
    tasks: HashMap<TaskId, Task>,

    /// Append-only execution history per task.
    history: HashMap<TaskId, Vec<ExecutionRecord>>,

    categories: HashMap<CategoryId, Category>,
}

impl StoreState {
    fn task(&self, id: TaskId) -> Result<&Task> {
        self.tasks.get(&id).ok_or(SchedulerError::TaskNotFound(id))
    }

    /// Check the stored status against `expected`.
    fn check_status(&self, id: TaskId, expected: TaskStatus) -> Result<()> {
        let actual = self.task(id)?.status;
        if actual != expected {
            return Err(SchedulerError::Conflict {
                task: id,
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Tasks matching `filter`, ordered by (created_at, id).
    fn collect(&self, filter: impl Fn(&Task) -> bool) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().filter(|t| filter(t)).cloned().collect();
        tasks.sort_by_key(|t| (t.created_at, t.id));
        tasks
    }
}

/// InMemoryTaskStore は TaskStore の in-memory 実装
///
/// # 使用例
/// ```ignore
/// let store = Arc::new(InMemoryTaskStore::new());
/// let scheduler = SchedulerBuilder::new().store(store.clone()) /* ... */ .build()?;
/// ```
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: Task) -> Result<TaskId> {
        let mut state = self.state.lock().await;
        let id = task.id;
        if state.tasks.contains_key(&id) {
            return Err(SchedulerError::AlreadyExists(id.to_string()));
        }
        state.tasks.insert(id, task);
        Ok(id)
    }

    async fn get(&self, id: TaskId) -> Result<Task> {
        self.state.lock().await.task(id).cloned()
    }

    async fn update_status(&self, id: TaskId, new: TaskStatus, expected: TaskStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_status(id, expected)?;
        if let Some(task) = state.tasks.get_mut(&id) {
            task.status = new;
        }
        Ok(())
    }

    async fn replace(&self, task: &Task, expected: TaskStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_status(task.id, expected)?;
        state.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn list_due(&self, as_of: DateTime<Utc>) -> Result<Vec<Task>> {
        let state = self.state.lock().await;
        let mut due = state.collect(|t| t.is_due(as_of));
        due.sort_by_key(|t| (t.due_at, t.id));
        Ok(due)
    }

    async fn list_non_terminal(&self) -> Result<Vec<Task>> {
        Ok(self.state.lock().await.collect(|t| !t.status.is_terminal()))
    }

    async fn list_all(&self) -> Result<Vec<Task>> {
        Ok(self.state.lock().await.collect(|_| true))
    }

    async fn delete(&self, id: TaskId) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .tasks
            .remove(&id)
            .ok_or(SchedulerError::TaskNotFound(id))?;
        state.history.remove(&id);
        Ok(())
    }

    async fn append_execution_record(&self, record: ExecutionRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        state.task(record.task_id)?;
        state.history.entry(record.task_id).or_default().push(record);
        Ok(())
    }

    async fn history(&self, id: TaskId) -> Result<Vec<ExecutionRecord>> {
        let state = self.state.lock().await;
        state.task(id)?;
        Ok(state.history.get(&id).cloned().unwrap_or_default())
    }

    async fn create_category(&self, category: Category) -> Result<CategoryId> {
        let mut state = self.state.lock().await;
        let id = category.id;
        if state.categories.contains_key(&id) {
            return Err(SchedulerError::AlreadyExists(id.to_string()));
        }
        state.categories.insert(id, category);
        Ok(id)
    }

    async fn get_category(&self, id: CategoryId) -> Result<Category> {
        self.state
            .lock()
            .await
            .categories
            .get(&id)
            .cloned()
            .ok_or(SchedulerError::CategoryNotFound(id))
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        let state = self.state.lock().await;
        let mut categories: Vec<Category> = state.categories.values().cloned().collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(categories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, NewTask, Outcome};
    use chrono::{Duration, TimeZone};

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, 0, 0).unwrap()
    }

    fn task(n: u128, due: DateTime<Utc>) -> Task {
        Task::from_new(TaskId::new(n), NewTask::once(format!("task {n}"), due), at(0))
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = InMemoryTaskStore::new();
        let t = task(1, at(9));
        let id = store.create(t.clone()).await.unwrap();
        assert_eq!(store.get(id).await.unwrap(), t);
    }

    #[tokio::test]
    async fn create_twice_is_rejected() {
        let store = InMemoryTaskStore::new();
        store.create(task(1, at(9))).await.unwrap();
        assert!(matches!(
            store.create(task(1, at(9))).await,
            Err(SchedulerError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let store = InMemoryTaskStore::new();
        let err = store.get(TaskId::new(42)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn update_status_is_compare_and_swap() {
        let store = InMemoryTaskStore::new();
        let id = store.create(task(1, at(9))).await.unwrap();

        store
            .update_status(id, TaskStatus::Ready, TaskStatus::Pending)
            .await
            .unwrap();

        // second claim of the same occurrence loses
        let err = store
            .update_status(id, TaskStatus::Ready, TaskStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Conflict {
                expected: TaskStatus::Pending,
                actual: TaskStatus::Ready,
                ..
            }
        ));
        assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Ready);
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let store = InMemoryTaskStore::new();
        let id = store.create(task(1, at(9))).await.unwrap();

        let claims = (0..8).map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .update_status(id, TaskStatus::Ready, TaskStatus::Pending)
                    .await
            })
        });
        let mut wins = 0;
        for claim in claims {
            if claim.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn replace_checks_expected_status() {
        let store = InMemoryTaskStore::new();
        let mut t = task(1, at(9));
        store.create(t.clone()).await.unwrap();

        t.due_at = at(10);
        t.retry_count = 1;
        assert!(store.replace(&t, TaskStatus::Running).await.is_err());
        store.replace(&t, TaskStatus::Pending).await.unwrap();
        assert_eq!(store.get(t.id).await.unwrap().due_at, at(10));
    }

    #[tokio::test]
    async fn list_due_filters_and_orders_by_due_at() {
        let store = InMemoryTaskStore::new();
        store.create(task(1, at(11))).await.unwrap();
        store.create(task(2, at(9))).await.unwrap();
        store.create(task(3, at(13))).await.unwrap();
        let running = store.create(task(4, at(8))).await.unwrap();
        store
            .update_status(running, TaskStatus::Running, TaskStatus::Pending)
            .await
            .unwrap();

        let due: Vec<TaskId> = store
            .list_due(at(12))
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(due, vec![TaskId::new(2), TaskId::new(1)]);
    }

    #[tokio::test]
    async fn history_is_append_only_in_order() {
        let store = InMemoryTaskStore::new();
        let id = store.create(task(1, at(9))).await.unwrap();

        for attempt in 1..=3 {
            let start = at(9) + Duration::minutes(attempt as i64);
            store
                .append_execution_record(ExecutionRecord::new(
                    id,
                    attempt,
                    start,
                    start,
                    &Outcome::failure(format!("try {attempt}")),
                ))
                .await
                .unwrap();
        }

        let attempts: Vec<u32> = store
            .history(id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.attempt)
            .collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn categories_are_listed_by_name() {
        let store = InMemoryTaskStore::new();
        for (n, name) in [(1, "work"), (2, "home"), (3, "focus")] {
            store
                .create_category(Category {
                    id: CategoryId::new(n),
                    name: name.into(),
                })
                .await
                .unwrap();
        }
        let names: Vec<String> = store
            .list_categories()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["focus", "home", "work"]);
        assert!(store.get_category(CategoryId::new(9)).await.is_err());
    }
}
