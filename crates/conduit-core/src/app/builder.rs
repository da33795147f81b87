//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use super::workflow::WorkflowHandler;
use crate::saga::{SagaDefinition, SagaOrchestrator};
use crate::typed::{DynHandler, Handler, RegistryError, TaskPayload, TypedRegistry};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .register::<RunBacktest, _>(RunBacktestHandler)?
///     .workflow("signup.v1", signup_saga, orchestrator.clone())?
///     .expect_tasks(&["quant.backtest.run.v1", "signup.v1"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_tasks() で期待される task_type を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
pub struct AppBuilder {
    registry: TypedRegistry,
    expected_tasks: Option<Vec<String>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: TypedRegistry::new(),
            expected_tasks: None,
        }
    }

    /// Handler を登録
    pub fn register<T: TaskPayload, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    /// 型消去済みの Handler をそのまま登録
    pub fn register_dyn(mut self, handler: Arc<dyn DynHandler>) -> Result<Self, RegistryError> {
        self.registry.register_dyn(handler)?;
        Ok(self)
    }

    /// `task_type` のタスクを saga として実行する
    ///
    /// saga id は task id から導出するので、同じタスクが再配送されても
    /// 新しい saga は作られず checkpoint から再開されます。
    pub fn workflow(
        self,
        task_type: impl Into<String>,
        definition: SagaDefinition,
        orchestrator: Arc<SagaOrchestrator>,
    ) -> Result<Self, RegistryError> {
        let handler = WorkflowHandler::new(task_type, Arc::new(definition), orchestrator);
        self.register_dyn(Arc::new(handler))
    }

    /// 期待される task_type のリストを設定
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// AppBuilder を構築して App を生成
    ///
    /// # 検証
    /// - expect_tasks() で設定された task_type が全て登録されているかチェック
    /// - 不足があれば BuildError::MissingTaskTypes を返す
    pub fn build(self) -> Result<App, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let registered_types = self.registry.registered_types();
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|x| !registered_types.contains(x))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }
        Ok(App {
            registry: self.registry,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// App は task_type → handler の対応を持つ実行時の表面
pub struct App {
    registry: TypedRegistry,
}

impl App {
    pub fn handler(&self, task_type: &str) -> Option<Arc<dyn DynHandler>> {
        self.registry.get(task_type)
    }

    /// Feed this to `TaskQueue::with_known_types` so recovery can spot
    /// tasks nobody can handle any more.
    pub fn registered_types(&self) -> Vec<String> {
        self.registry.registered_types()
    }
}
