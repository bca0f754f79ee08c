//! Scheduler - 期限到来タスクの発見・依存チェック・claim・実行
//!
//! # フロー（tick 1 回分）
//! 1. `clock.now()`
//! 2. `TaskStore::list_due(now)` で PENDING かつ due のタスクを取得
//! 3. 依存グラフで前提タスクが全て完了しているか確認（未完了なら PENDING のまま）
//! 4. `update_status(Ready, expected = Pending)` で claim（CAS 勝者だけが進む）
//! 5. 実行ジョブを spawn。ジョブはスロット（Semaphore）を待ち、
//!    `Ready -> Running` にしてから Executor を呼ぶ
//! 6. ExecutionTracker が試行を記録し、Decision を適用する
//!
//! tick は実行の完了を待たない。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, Semaphore, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::recurrence::RecurrenceEngine;
use super::tracker::ExecutionTracker;
use crate::domain::{
    Category, CategoryId, Decision, NewTask, Outcome, OutcomeKind, Result, SchedulerError, Task,
    TaskId, TaskStatus,
};
use crate::graph::{DependencyGraph, SharedGraph};
use crate::ports::{Clock, Executor, IdGenerator, NotificationHook, TaskStore};

/// How many times a lost claim is re-read and retried within one tick.
const CLAIM_RETRIES: usize = 3;

/// Runtime knobs of a scheduler instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    /// Period of the polling loop in `run`.
    pub tick_interval: Duration,

    /// Executions allowed in flight at once.
    pub max_concurrent: usize,

    /// Per-attempt limit. `None` lets an attempt run as long as it likes.
    pub execution_timeout: Option<Duration>,

    /// Cancel in-flight executions when `run` is asked to stop.
    pub cancel_on_shutdown: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_concurrent: 4,
            execution_timeout: None,
            cancel_on_shutdown: false,
        }
    }
}

/// What one `tick` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Pending tasks whose due time has arrived.
    pub due: usize,

    /// Occurrences claimed and handed to an execution job.
    pub dispatched: usize,

    /// Due tasks still waiting on prerequisites.
    pub waiting: usize,

    /// Claims lost to another scheduler instance.
    pub conflicts: usize,
}

/// What `recover` found in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Non-terminal tasks reloaded.
    pub loaded: usize,

    /// Dependency edges rebuilt.
    pub edges: usize,

    /// Orphaned READY / RUNNING tasks returned to PENDING.
    pub requeued: usize,
}

/// Scheduler は tick ごとに due タスクを実行へ回す
///
/// # 使用例
/// ```ignore
/// let scheduler = SchedulerBuilder::new()
///     .store(store)
///     .executor(executor)
///     .build()?;
/// scheduler.recover().await?;
/// scheduler.run(shutdown.clone()).await;
/// ```
///
/// # 排他
/// - インスタンス間の排他は TaskStore の CAS のみ
/// - インスタンス内の同時実行数は Semaphore で制限
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn Executor>,
    hook: Arc<dyn NotificationHook>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    graph: SharedGraph,
    recurrence: RecurrenceEngine,
    tracker: ExecutionTracker,
    settings: SchedulerSettings,

    /// Execution slots.
    slots: Arc<Semaphore>,

    /// Spawned execution jobs.
    jobs: TaskTracker,

    /// Cancellation handle of every dispatched occurrence.
    in_flight: Mutex<HashMap<TaskId, CancellationToken>>,

    /// Number of dispatched occurrences not finished yet.
    active: watch::Sender<usize>,

    /// Wakes `run` before the next interval tick.
    wake: Notify,
}

impl Scheduler {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn Executor>,
        hook: Arc<dyn NotificationHook>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        tracker: ExecutionTracker,
        settings: SchedulerSettings,
    ) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            recurrence: RecurrenceEngine::new(Arc::clone(&clock)),
            slots: Arc::new(Semaphore::new(settings.max_concurrent)),
            graph: SharedGraph::default(),
            jobs: TaskTracker::new(),
            in_flight: Mutex::new(HashMap::new()),
            wake: Notify::new(),
            store,
            executor,
            hook,
            clock,
            ids,
            tracker,
            settings,
            active,
        }
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Occurrences dispatched and not yet finished.
    pub fn in_flight(&self) -> usize {
        *self.active.borrow()
    }

    // ========================================
    // task management
    // ========================================

    /// Validate and persist a new task.
    ///
    /// Errors: `InvalidRecurrence`, `CategoryNotFound`, `TaskNotFound` for an
    /// unknown prerequisite.
    pub async fn create_task(&self, new: NewTask) -> Result<TaskId> {
        new.recurrence.validate()?;
        if let Some(category) = new.category {
            self.store.get_category(category).await?;
        }
        for prerequisite in &new.prerequisites {
            self.store.get(*prerequisite).await?;
        }

        let id = self.ids.generate_task_id();
        self.graph.add_edges(id, &new.prerequisites).await?;

        let task = Task::from_new(id, new, self.clock.now());
        let (title, due_at) = (task.title.clone(), task.due_at);
        if let Err(err) = self.store.create(task).await {
            self.graph.remove_task(id).await;
            return Err(err);
        }

        tracing::info!(task = %id, title = %title, due_at = %due_at, "task created");
        self.wake();
        Ok(id)
    }

    /// Register a category. Names are labels only, duplicates are allowed.
    pub async fn create_category(&self, name: impl Into<String>) -> Result<CategoryId> {
        let category = Category {
            id: self.ids.generate_category_id(),
            name: name.into(),
        };
        let id = self.store.create_category(category).await?;
        tracing::info!(category = %id, "category created");
        Ok(id)
    }

    /// Make `task` depend on `prerequisite`.
    ///
    /// The edge is cycle-checked against the live graph first and rolled back
    /// if the store rejects the update.
    pub async fn add_prerequisite(&self, task: TaskId, prerequisite: TaskId) -> Result<()> {
        let mut record = self.store.get(task).await?;
        self.store.get(prerequisite).await?;
        if record.status.is_terminal() {
            return Err(SchedulerError::Conflict {
                task,
                expected: TaskStatus::Pending,
                actual: record.status,
            });
        }
        if record.prerequisites.contains(&prerequisite) {
            return Ok(());
        }

        self.graph.add_edge(task, prerequisite).await?;
        record.prerequisites.push(prerequisite);
        if let Err(err) = self.store.replace(&record, record.status).await {
            self.graph.remove_edge(task, prerequisite).await;
            return Err(err);
        }

        tracing::info!(task = %task, prerequisite = %prerequisite, "prerequisite added");
        Ok(())
    }

    /// `Pending -> Cancelled`. Claimed or running occurrences are a `Conflict`;
    /// use `cancel_execution` for those.
    pub async fn cancel_task(&self, id: TaskId) -> Result<()> {
        self.store
            .update_status(id, TaskStatus::Cancelled, TaskStatus::Pending)
            .await?;
        self.graph.detach(id).await;
        self.tracker.reset(id);
        tracing::info!(task = %id, "task cancelled");
        Ok(())
    }

    /// Ask the in-flight execution of `id` to stop.
    ///
    /// Returns false when nothing is in flight for `id`. The attempt ends as
    /// `Cancelled` and goes through the normal retry decision.
    pub fn cancel_execution(&self, id: TaskId) -> bool {
        match self.lock_in_flight().get(&id) {
            Some(token) => {
                token.cancel();
                tracing::info!(task = %id, "execution cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Remove a task and its history.
    ///
    /// Claimed or running tasks are a `Conflict`. Tasks that others still
    /// wait on are `HasDependents`.
    pub async fn delete_task(&self, id: TaskId) -> Result<()> {
        let task = self.store.get(id).await?;
        if matches!(task.status, TaskStatus::Ready | TaskStatus::Running) {
            return Err(SchedulerError::Conflict {
                task: id,
                expected: TaskStatus::Pending,
                actual: task.status,
            });
        }
        let dependents = self.graph.dependents(id).await;
        if !dependents.is_empty() {
            return Err(SchedulerError::HasDependents {
                task: id,
                count: dependents.len(),
            });
        }

        self.store.delete(id).await?;
        self.graph.remove_task(id).await;
        self.tracker.reset(id);
        tracing::info!(task = %id, "task deleted");
        Ok(())
    }

    // ========================================
    // recovery
    // ========================================

    /// Reload state after a restart.
    ///
    /// Rebuilds the dependency graph from every non-terminal task and returns
    /// READY / RUNNING tasks that this instance is not running to PENDING.
    /// Call before `run`, while no other instance is executing from the
    /// same store.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let (tasks, edges) = self.load_graph().await?;

        let mut requeued = 0;
        for task in &tasks {
            if !matches!(task.status, TaskStatus::Ready | TaskStatus::Running)
                || self.lock_in_flight().contains_key(&task.id)
            {
                continue;
            }
            match self
                .store
                .update_status(task.id, TaskStatus::Pending, task.status)
                .await
            {
                Ok(()) => {
                    tracing::warn!(task = %task.id, was = %task.status, "orphaned task returned to PENDING");
                    requeued += 1;
                }
                Err(err) if err.is_conflict() => {}
                Err(err) => return Err(err),
            }
        }

        let report = RecoveryReport {
            loaded: tasks.len(),
            edges,
            requeued,
        };
        tracing::info!(
            loaded = report.loaded,
            edges = report.edges,
            requeued = report.requeued,
            "state recovered"
        );
        Ok(report)
    }

    /// Rebuild the dependency graph from the store without touching any
    /// task. Returns the number of edges loaded.
    pub async fn rebuild_graph(&self) -> Result<usize> {
        let (_, edges) = self.load_graph().await?;
        Ok(edges)
    }

    async fn load_graph(&self) -> Result<(Vec<Task>, usize)> {
        let tasks = self.store.list_non_terminal().await?;
        let graph = DependencyGraph::from_tasks(&tasks)?;
        let edges = graph.edge_count();
        self.graph.replace(graph).await;
        Ok((tasks, edges))
    }

    // ========================================
    // loop
    // ========================================

    /// Tick on an interval (and on `wake`) until `shutdown` fires, then wait
    /// for in-flight executions to finish.
    pub async fn run(self: &Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            tick_ms = self.settings.tick_interval.as_millis() as u64,
            max_concurrent = self.settings.max_concurrent,
            "scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Ok(report) if report.due > 0 => tracing::debug!(
                    due = report.due,
                    dispatched = report.dispatched,
                    waiting = report.waiting,
                    conflicts = report.conflicts,
                    "tick"
                ),
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "tick failed"),
            }
        }

        if self.settings.cancel_on_shutdown {
            for token in self.lock_in_flight().values() {
                token.cancel();
            }
        }
        tracing::info!(in_flight = self.in_flight(), "scheduler stopping");
        self.jobs.close();
        self.jobs.wait().await;
        self.jobs.reopen();
        tracing::info!("scheduler stopped");
    }

    /// Run the next tick now instead of at the next interval.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Wait until no dispatched occurrence is in flight.
    pub async fn drain(&self) {
        let mut active = self.active.subscribe();
        // the sender lives as long as self
        let _ = active.wait_for(|n| *n == 0).await;
    }

    /// One scheduling pass. Never waits on an execution.
    pub async fn tick(self: &Arc<Self>) -> Result<TickReport> {
        let now = self.clock.now();
        let due = self.store.list_due(now).await?;
        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };

        for task in due {
            // 他インスタンスが書いた依存もここで取り込む
            if let Err(err) = self.graph.add_edges(task.id, &task.prerequisites).await {
                tracing::warn!(task = %task.id, error = %err, "stored prerequisites rejected");
                report.waiting += 1;
                continue;
            }
            if !self.prerequisites_met(task.id).await? {
                tracing::trace!(task = %task.id, "waiting on prerequisites");
                report.waiting += 1;
                continue;
            }
            match self.claim(task).await? {
                Some(claimed) => {
                    self.dispatch(claimed);
                    report.dispatched += 1;
                }
                None => report.conflicts += 1,
            }
        }
        Ok(report)
    }

    /// Resolve every prerequisite's status from the store and ask the graph.
    async fn prerequisites_met(&self, id: TaskId) -> Result<bool> {
        let mut statuses = HashMap::new();
        for prerequisite in self.graph.prerequisites(id).await {
            match self.store.get(prerequisite).await {
                Ok(task) => {
                    statuses.insert(prerequisite, task.status_for_dependents());
                }
                Err(SchedulerError::TaskNotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(self
            .graph
            .is_ready(id, |p| statuses.get(&p).copied())
            .await)
    }

    /// `Pending -> Ready`. `None` when another instance got there first.
    async fn claim(&self, mut task: Task) -> Result<Option<Task>> {
        for _ in 0..CLAIM_RETRIES {
            match self
                .store
                .update_status(task.id, TaskStatus::Ready, TaskStatus::Pending)
                .await
            {
                Ok(()) => {
                    task.status = TaskStatus::Ready;
                    return Ok(Some(task));
                }
                Err(err) if err.is_conflict() => {
                    // 読み直して、まだ due なら再挑戦
                    match self.store.get(task.id).await {
                        Ok(current) if current.is_due(self.clock.now()) => task = current,
                        Ok(_) | Err(SchedulerError::TaskNotFound(_)) => break,
                        Err(err) => return Err(err),
                    }
                }
                Err(SchedulerError::TaskNotFound(_)) => break,
                Err(err) => return Err(err),
            }
        }
        tracing::debug!(task = %task.id, "claim lost");
        Ok(None)
    }

    fn dispatch(self: &Arc<Self>, task: Task) {
        let id = task.id;
        let cancel = CancellationToken::new();
        self.lock_in_flight().insert(id, cancel.clone());
        self.active.send_modify(|n| *n += 1);

        let guard = InFlightGuard {
            scheduler: Arc::clone(self),
            id,
        };
        self.jobs.spawn(async move {
            if let Err(err) = guard.scheduler.execute(task, cancel).await {
                tracing::error!(task = %id, error = %err, "execution job failed");
            }
            drop(guard);
        });
    }

    /// Body of one execution job.
    async fn execute(&self, mut task: Task, cancel: CancellationToken) -> Result<()> {
        let permit = tokio::select! {
            permit = Arc::clone(&self.slots).acquire_owned() => Some(
                permit.map_err(|_| SchedulerError::Other("execution slots closed".into()))?,
            ),
            _ = cancel.cancelled() => None,
        };
        let Some(_permit) = permit else {
            // cancelled while waiting for a slot
            let now = self.clock.now();
            return self
                .finish(task, TaskStatus::Ready, Outcome::cancelled(), now)
                .await;
        };

        if let Err(err) = self
            .store
            .update_status(task.id, TaskStatus::Running, TaskStatus::Ready)
            .await
        {
            self.release(task.id, TaskStatus::Ready).await;
            return Err(err);
        }
        task.status = TaskStatus::Running;
        let started_at = self.clock.now();
        task.last_run_at = Some(started_at);
        tracing::info!(task = %task.id, title = %task.title, "execution started");

        let outcome = self.run_executor(&task, &cancel).await;
        self.finish(task, TaskStatus::Running, outcome, started_at)
            .await
    }

    async fn run_executor(&self, task: &Task, cancel: &CancellationToken) -> Outcome {
        let limit = self.settings.execution_timeout;
        let deadline = async {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            outcome = self.executor.run(task, cancel.clone()) => outcome,
            _ = deadline => {
                cancel.cancel();
                Outcome::timeout(format!(
                    "exceeded {}ms",
                    limit.unwrap_or_default().as_millis()
                ))
            }
            _ = cancel.cancelled() => Outcome::cancelled(),
        }
    }

    /// Record the attempt and apply the tracker's decision.
    ///
    /// When either step fails the occurrence is released back to PENDING,
    /// so a later tick runs it again instead of leaving it claimed.
    async fn finish(
        &self,
        task: Task,
        expected: TaskStatus,
        outcome: Outcome,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        let id = task.id;
        let result = self.settle(task, expected, outcome, started_at).await;
        if result.is_err() {
            self.release(id, expected).await;
        }
        // dependents may be runnable now
        self.wake();
        result
    }

    async fn settle(
        &self,
        task: Task,
        expected: TaskStatus,
        outcome: Outcome,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        let record = self
            .tracker
            .record_attempt(&task, &outcome, started_at)
            .await?;
        let decision = self.tracker.decide(&record, &outcome);
        self.apply(task, expected, decision, &outcome).await
    }

    /// `expected -> Pending` for an occurrence this instance could not finish.
    async fn release(&self, id: TaskId, expected: TaskStatus) {
        match self
            .store
            .update_status(id, TaskStatus::Pending, expected)
            .await
        {
            Ok(()) => {
                tracing::warn!(task = %id, was = %expected, "unfinished occurrence returned to PENDING");
            }
            Err(err) => {
                tracing::error!(task = %id, error = %err, "cannot release occurrence, recover will requeue it");
            }
        }
    }

    async fn apply(
        &self,
        task: Task,
        expected: TaskStatus,
        decision: Decision,
        outcome: &Outcome,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut next = task.clone();

        match decision {
            Decision::Complete => {
                next.retry_count = 0;
                next.last_completed_at = Some(now);
                match self.recurrence.next_fire(&task.recurrence, task.due_at)? {
                    Some(fire) => {
                        next.status = TaskStatus::Pending;
                        next.due_at = fire.at;
                        self.store.replace(&next, expected).await?;
                        self.tracker.reset(task.id);
                        tracing::info!(task = %task.id, next_due = %fire.at, "occurrence completed");
                        if fire.missed > 0 {
                            self.hook.on_recurrence_missed(&next, fire.missed);
                        }
                    }
                    None => {
                        next.status = TaskStatus::Completed;
                        self.store.replace(&next, expected).await?;
                        self.tracker.reset(task.id);
                        self.graph.detach(task.id).await;
                        tracing::info!(task = %task.id, "task completed");
                    }
                }
            }
            Decision::Retry { delay, attempt } => {
                let backoff = chrono::Duration::from_std(delay)
                    .map_err(|e| SchedulerError::Other(format!("backoff out of range: {e}")))?;
                next.status = TaskStatus::Pending;
                next.retry_count = attempt;
                next.due_at = now + backoff;
                self.store.replace(&next, expected).await?;
                tracing::warn!(
                    task = %task.id,
                    attempt,
                    outcome = outcome.kind.as_str(),
                    retry_at = %next.due_at,
                    "attempt failed, retry scheduled"
                );
            }
            Decision::GiveUp { attempts, reason } => {
                next.status = TaskStatus::Failed;
                next.retry_count = attempts;
                self.store.replace(&next, expected).await?;
                self.tracker.reset(task.id);
                self.graph.detach(task.id).await;

                let error = match outcome.kind {
                    OutcomeKind::Timeout => SchedulerError::ExecutionTimeout {
                        task: task.id,
                        detail: reason,
                    },
                    _ => SchedulerError::ExecutionFailure {
                        task: task.id,
                        detail: reason,
                    },
                };
                tracing::error!(task = %task.id, attempts, error = %error, "task failed");
                self.hook.on_terminal_failure(&next, &error);
            }
        }
        Ok(())
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<TaskId, CancellationToken>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Releases the in-flight slot of one occurrence, even if the job panics.
struct InFlightGuard {
    scheduler: Arc<Scheduler>,
    id: TaskId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.scheduler.lock_in_flight().remove(&self.id);
        self.scheduler.active.send_modify(|n| *n = n.saturating_sub(1));
        self.scheduler.wake();
    }
}
