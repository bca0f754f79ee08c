//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: テスト・組み込み用の正本
//! - **SqliteTaskStore**: ファイルに永続化される正本（CLI が使う）

pub mod inmem_store;
pub mod sqlite_store;

pub use self::inmem_store::InMemoryTaskStore;
pub use self::sqlite_store::SqliteTaskStore;
