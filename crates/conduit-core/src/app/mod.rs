//! App - アプリケーション層
//!
//! queue / saga / typed を組み合わせて、実際にタスクを流す部品を提供します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: handler と workflow の登録、起動時検証
//! - **WorkerPool**: consume → handle → complete / fail のループ
//! - **WorkflowHandler**: saga を 1 タスクとして実行
//! - **RecoveryMonitor**: 放置された in-flight タスクの定期回収

pub mod builder;
pub mod recovery_monitor;
pub mod worker_loop;
pub mod workflow;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::recovery_monitor::{
    MonitorError, MonitorHandle, RecoveryMonitor, RecoveryOptions, TickReport,
};
pub use self::worker_loop::{WorkerOptions, WorkerPool, process_delivery};
pub use self::workflow::WorkflowHandler;
