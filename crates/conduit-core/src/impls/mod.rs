//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryLogStore**: consumer group / PEL / claim を持つ開発用 log store
//! - **InMemoryCheckpointStore**: テスト用の checkpoint store
//! - **FileCheckpointStore**: saga ごとの JSON ファイル（temp + rename）
//!
//! # 本番用実装
//! Redis Streams などの log store は `LogStore` trait を実装した別クレートに置きます。

pub mod file_checkpoint;
pub mod inmem_checkpoint;
pub mod inmem_log;

// 主要な型を再エクスポート
pub use self::file_checkpoint::FileCheckpointStore;
pub use self::inmem_checkpoint::InMemoryCheckpointStore;
pub use self::inmem_log::InMemoryLogStore;
