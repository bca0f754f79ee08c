//! App - アプリケーション層
//!
//! ports を組み合わせてスケジューリングのロジックを実装します。
//!
//! # 主要コンポーネント
//! - **SchedulerBuilder**: 構築とワイヤリング（Fail-fast 検証）
//! - **Scheduler**: tick / claim / 実行 / Decision の適用 / 復旧
//! - **RecurrenceEngine**: 次回発火時刻の計算（取りこぼしはまとめる）
//! - **ExecutionTracker**: 試行回数と実行履歴

pub mod builder;
pub mod recurrence;
pub mod scheduler;
pub mod tracker;

pub use self::builder::{BuildError, SchedulerBuilder};
pub use self::recurrence::{NextFire, RecurrenceEngine};
pub use self::scheduler::{RecoveryReport, Scheduler, SchedulerSettings, TickReport};
pub use self::tracker::ExecutionTracker;
