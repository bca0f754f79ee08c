#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use taskloom_core::domain::{
    Category, CategoryId, ErrorKind, ExecutionRecord, Outcome, SchedulerError, Task, TaskId,
    TaskStatus,
};
use taskloom_core::ports::{Clock, Executor, FixedClock, NotificationHook, TaskStore};
use taskloom_core::{Scheduler, SchedulerBuilder};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
}

/// How a scripted run behaves.
#[derive(Debug, Clone)]
pub enum Step {
    Return(Outcome),
    /// Sleep, then succeed.
    Sleep(Duration),
    /// Block until cancelled.
    WaitForCancel,
}

/// Executor that replays a script, then falls back to `default`.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Step>>,
    default: Step,
    runs: Mutex<Vec<String>>,
    current: AtomicUsize,
    peak: AtomicUsize,
    pub started: Notify,
}

impl ScriptedExecutor {
    pub fn new(default: Step) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            default,
            runs: Mutex::new(Vec::new()),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: Notify::new(),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::new(Step::Return(Outcome::success()))
    }

    pub fn failing() -> Arc<Self> {
        Self::new(Step::Return(Outcome::failure("exit status 1")))
    }

    pub fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }

    /// Titles of every run, in start order.
    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn run(&self, task: &Task, cancel: CancellationToken) -> Outcome {
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        self.runs.lock().unwrap().push(task.title.clone());
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started.notify_one();

        let outcome = match step {
            Step::Return(outcome) => outcome,
            Step::Sleep(d) => {
                tokio::time::sleep(d).await;
                Outcome::success()
            }
            Step::WaitForCancel => {
                cancel.cancelled().await;
                Outcome::cancelled()
            }
        };
        self.current.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Hook that remembers every call.
#[derive(Default)]
pub struct RecordingHook {
    failures: Mutex<Vec<(TaskId, ErrorKind)>>,
    missed: Mutex<Vec<(TaskId, u32)>>,
}

impl RecordingHook {
    pub fn failures(&self) -> Vec<(TaskId, ErrorKind)> {
        self.failures.lock().unwrap().clone()
    }

    pub fn missed(&self) -> Vec<(TaskId, u32)> {
        self.missed.lock().unwrap().clone()
    }
}

impl NotificationHook for RecordingHook {
    fn on_terminal_failure(&self, task: &Task, error: &SchedulerError) {
        self.failures.lock().unwrap().push((task.id, error.kind()));
    }

    fn on_recurrence_missed(&self, task: &Task, missed_count: u32) {
        self.missed.lock().unwrap().push((task.id, missed_count));
    }
}

/// Store wrapper whose next `fail_appends` history appends error out.
pub struct FlakyStore {
    inner: Arc<dyn TaskStore>,
    fail_appends: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn TaskStore>, fail_appends: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_appends: AtomicUsize::new(fail_appends),
        })
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn create(&self, task: Task) -> taskloom_core::Result<TaskId> {
        self.inner.create(task).await
    }

    async fn get(&self, id: TaskId) -> taskloom_core::Result<Task> {
        self.inner.get(id).await
    }

    async fn update_status(
        &self,
        id: TaskId,
        new: TaskStatus,
        expected: TaskStatus,
    ) -> taskloom_core::Result<()> {
        self.inner.update_status(id, new, expected).await
    }

    async fn replace(&self, task: &Task, expected: TaskStatus) -> taskloom_core::Result<()> {
        self.inner.replace(task, expected).await
    }

    async fn list_due(&self, as_of: DateTime<Utc>) -> taskloom_core::Result<Vec<Task>> {
        self.inner.list_due(as_of).await
    }

    async fn list_non_terminal(&self) -> taskloom_core::Result<Vec<Task>> {
        self.inner.list_non_terminal().await
    }

    async fn list_all(&self) -> taskloom_core::Result<Vec<Task>> {
        self.inner.list_all().await
    }

    async fn delete(&self, id: TaskId) -> taskloom_core::Result<()> {
        self.inner.delete(id).await
    }

    async fn append_execution_record(&self, record: ExecutionRecord) -> taskloom_core::Result<()> {
        let failing = self
            .fail_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SchedulerError::Other("database is locked".into()));
        }
        self.inner.append_execution_record(record).await
    }

    async fn history(&self, id: TaskId) -> taskloom_core::Result<Vec<ExecutionRecord>> {
        self.inner.history(id).await
    }

    async fn create_category(&self, category: Category) -> taskloom_core::Result<CategoryId> {
        self.inner.create_category(category).await
    }

    async fn get_category(&self, id: CategoryId) -> taskloom_core::Result<Category> {
        self.inner.get_category(id).await
    }

    async fn list_categories(&self) -> taskloom_core::Result<Vec<Category>> {
        self.inner.list_categories().await
    }
}

pub struct Harness {
    pub scheduler: Arc<Scheduler>,
    pub clock: Arc<FixedClock>,
    pub executor: Arc<ScriptedExecutor>,
    pub hook: Arc<RecordingHook>,
}

impl Harness {
    pub fn new(store: Arc<dyn TaskStore>, executor: Arc<ScriptedExecutor>) -> Self {
        Self::with(store, executor, |b| b)
    }

    pub fn with(
        store: Arc<dyn TaskStore>,
        executor: Arc<ScriptedExecutor>,
        configure: impl FnOnce(SchedulerBuilder) -> SchedulerBuilder,
    ) -> Self {
        let clock = Arc::new(FixedClock::new(t0()));
        let hook = Arc::new(RecordingHook::default());
        let builder = SchedulerBuilder::new()
            .store(store)
            .executor(executor.clone())
            .clock(clock.clone())
            .notification_hook(hook.clone());
        let scheduler = configure(builder).build().unwrap();
        Self {
            scheduler,
            clock,
            executor,
            hook,
        }
    }

    /// One tick, then wait for everything it dispatched.
    pub async fn tick_and_drain(&self) -> taskloom_core::app::TickReport {
        let report = self.scheduler.tick().await.unwrap();
        self.scheduler.drain().await;
        report
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn task(&self, id: TaskId) -> Task {
        self.scheduler.store().get(id).await.unwrap()
    }
}
