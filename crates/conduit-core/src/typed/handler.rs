//! Handler trait - Task を実行する Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<T>)
//! - Object-safe trait (DynHandler)
//! - Type erasure パターン (TypedHandler<T, H> → DynHandler)

use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;

use super::codec::PayloadCodec;
use super::task::TaskPayload;
use crate::domain::{ExecError, Task};

/// Handler は payload を受け取って結果の JSON を返す
///
/// # 使用例
/// ```ignore
/// struct RunBacktestHandler;
///
/// #[async_trait]
/// impl Handler<RunBacktest> for RunBacktestHandler {
///     async fn handle(&self, task: RunBacktest) -> Result<Value, ExecError> {
///         Ok(json!({ "strategy": task.strategy }))
///     }
/// }
/// ```
///
/// # ジェネリクスによる型安全性
/// - `Handler<RunBacktest>` は `RunBacktest` しか受け取れない
/// - コンパイル時に payload 型と Handler の対応が保証される
#[async_trait]
pub trait Handler<T: TaskPayload>: Send + Sync {
    async fn handle(&self, task: T) -> Result<Value, ExecError>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// 配送された `Task` をそのまま受け取るので、task id や試行回数が必要な
/// handler（saga の実行など）は直接これを実装します。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, task: &Task) -> Result<Value, ExecError>;
    fn task_type(&self) -> &str;
}

pub struct TypedHandler<T: TaskPayload, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<T>,
}

impl<T: TaskPayload, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TaskPayload, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, task: &Task) -> Result<Value, ExecError> {
        let payload: T = PayloadCodec::decode(task)?;
        self.handler.handle(payload).await
    }

    fn task_type(&self) -> &str {
        T::TYPE
    }
}
