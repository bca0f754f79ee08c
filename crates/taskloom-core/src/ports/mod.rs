//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部（永続化、時計、実際のタスク処理、通知）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - TaskStore が source of truth（正本）
//! - 依存グラフはメモリ上の派生インデックス（いつでも再構築可能）

pub mod clock;
pub mod executor;
pub mod id_generator;
pub mod notification;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::executor::Executor;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::notification::{NotificationHook, TracingNotificationHook};
pub use self::task_store::TaskStore;
