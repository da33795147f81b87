//! conduit-core
//!
//! 優先度付きタスクキューと saga オーケストレーションの中核。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, priority, task, dead letter, errors）
//! - **ports**: 抽象化レイヤー（LogStore, CheckpointStore, Clock, IdGenerator）
//! - **impls**: ports の実装（InMemoryLogStore, InMemoryCheckpointStore, FileCheckpointStore）
//! - **queue**: TaskQueue（priority lane, retry, dead letter, recovery）
//! - **saga**: SagaDefinition / SagaOrchestrator（checkpoint と補償）
//! - **typed**: 型付き Task API（TaskPayload, Handler, TypedRegistry, PayloadCodec）
//! - **app**: AppBuilder, WorkerPool, WorkflowHandler, RecoveryMonitor
//! - **config**: `conduit.toml` の読み込み
//!
//! # 配送保証
//! at-least-once。handler は冪等であることを前提にしています。

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod saga;
pub mod typed;
