//! taskloom-core
//!
//! Recurring task scheduler with dependency-aware ordering and durable state.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, recurrence, cron, outcome, attempt, retry, decision, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, Executor, NotificationHook, Clock, IdGenerator）
//! - **graph**: 前提タスクの依存グラフ（循環検出つき）
//! - **app**: Scheduler, SchedulerBuilder, RecurrenceEngine, ExecutionTracker
//! - **impls**: ports の実装（InMemoryTaskStore, SqliteTaskStore）
//! - **config**: TOML 設定ファイル

pub mod app;
pub mod config;
pub mod domain;
pub mod graph;
pub mod impls;
pub mod ports;

pub use app::{Scheduler, SchedulerBuilder};
pub use config::TaskloomConfig;
pub use domain::{Result, SchedulerError};
