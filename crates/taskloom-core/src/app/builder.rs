//! SchedulerBuilder - Scheduler の構築とワイヤリング
//!
//! # 方針
//! - 起動時検証（Fail-fast 設計）
//! - 必須は TaskStore と Executor だけ。残りはデフォルトがある
//!   （SystemClock, TracingNotificationHook, UlidGenerator, DefaultDecider）

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use super::scheduler::{Scheduler, SchedulerSettings};
use super::tracker::ExecutionTracker;
use crate::config::TaskloomConfig;
use crate::domain::{Decider, DefaultDecider, RetryPolicy};
use crate::ports::{
    Clock, Executor, IdGenerator, NotificationHook, SystemClock, TaskStore,
    TracingNotificationHook, UlidGenerator,
};

/// SchedulerBuilder は Scheduler を構築
///
/// # 使用例
/// ```ignore
/// let scheduler = SchedulerBuilder::new()
///     .store(Arc::new(SqliteTaskStore::open("taskloom.db")?))
///     .executor(Arc::new(ShellExecutor::default()))
///     .config(&config)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - store / executor が無ければ BuildError
/// - 同時実行数 0、tick 間隔 0、試行回数 0 なども build() で弾く
pub struct SchedulerBuilder {
    store: Option<Arc<dyn TaskStore>>,
    executor: Option<Arc<dyn Executor>>,
    hook: Option<Arc<dyn NotificationHook>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    decider: Option<Arc<dyn Decider>>,
    retry_policy: RetryPolicy,
    settings: SchedulerSettings,
}

/// BuildError は Scheduler 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no task store configured")]
    MissingStore,

    #[error("no executor configured")]
    MissingExecutor,

    #[error("invalid scheduler settings: {0}")]
    InvalidSettings(String),
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            executor: None,
            hook: None,
            clock: None,
            ids: None,
            decider: None,
            retry_policy: RetryPolicy::default(),
            settings: SchedulerSettings::default(),
        }
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn notification_hook(mut self, hook: Arc<dyn NotificationHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Replace the retry decision entirely. `retry_policy` is ignored then.
    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn settings(mut self, settings: SchedulerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.settings.tick_interval = interval;
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.settings.max_concurrent = n;
        self
    }

    pub fn execution_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings.execution_timeout = timeout;
        self
    }

    /// Take settings and retry policy from a loaded config file.
    pub fn config(self, config: &TaskloomConfig) -> Self {
        self.settings(config.scheduler_settings())
            .retry_policy(config.retry_policy())
    }

    /// Validate and wire everything together.
    pub fn build(self) -> Result<Arc<Scheduler>, BuildError> {
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let executor = self.executor.ok_or(BuildError::MissingExecutor)?;
        validate(&self.settings, &self.retry_policy, self.decider.is_some())?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let hook = self
            .hook
            .unwrap_or_else(|| Arc::new(TracingNotificationHook));
        let decider = self
            .decider
            .unwrap_or_else(|| Arc::new(DefaultDecider::new(self.retry_policy)));

        let tracker = ExecutionTracker::new(Arc::clone(&store), decider, Arc::clone(&clock));
        Ok(Arc::new(Scheduler::new(
            store,
            executor,
            hook,
            clock,
            ids,
            tracker,
            self.settings,
        )))
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(
    settings: &SchedulerSettings,
    policy: &RetryPolicy,
    custom_decider: bool,
) -> Result<(), BuildError> {
    let invalid = |msg: &str| Err(BuildError::InvalidSettings(msg.to_string()));
    if settings.max_concurrent == 0 {
        return invalid("max_concurrent must be at least 1");
    }
    if settings.max_concurrent > Semaphore::MAX_PERMITS {
        return Err(BuildError::InvalidSettings(format!(
            "max_concurrent must be at most {}",
            Semaphore::MAX_PERMITS
        )));
    }
    if settings.tick_interval.is_zero() {
        return invalid("tick_interval must be greater than zero");
    }
    if settings.execution_timeout.is_some_and(|t| t.is_zero()) {
        return invalid("execution_timeout must be greater than zero");
    }
    if !custom_decider {
        if policy.max_attempts == 0 {
            return invalid("max_attempts must be at least 1");
        }
        if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
            return invalid("multiplier must be a finite number >= 1.0");
        }
    }
    Ok(())
}
