//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（Redis Streams 相当の log store、checkpoint の保存先、
//! 時刻、ID 生成）へのインターフェースで、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - log store が配送と所有権の正本
//! - checkpoint store が saga 進捗の正本
//! - 時刻と ID はテストで差し替え可能

pub mod checkpoint_store;
pub mod clock;
pub mod id_generator;
pub mod log_store;

pub use self::checkpoint_store::{CheckpointError, CheckpointStore};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::log_store::{EntryId, LogEntry, LogStore, LogStoreError, PendingEntry};
