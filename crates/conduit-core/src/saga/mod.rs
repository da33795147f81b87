//! Saga - 補償トランザクションによるワークフロー
//!
//! # 主要コンポーネント
//! - **SagaStep / SagaDefinition**: action と compensation の組、その不変な列
//! - **SagaInstance / SagaContext**: 実行中の状態と step 間で受け渡す値
//! - **SagaCheckpoint**: step 遷移ごとに永続化するスナップショット
//! - **SagaOrchestrator**: 実行・リトライ・逆順補償・checkpoint からの再開

pub mod checkpoint;
pub mod definition;
pub mod instance;
pub mod orchestrator;
pub mod step;

pub use self::checkpoint::SagaCheckpoint;
pub use self::definition::{DefinitionError, SagaDefinition, SagaDefinitionBuilder};
pub use self::instance::{SagaContext, SagaInstance, SagaResult, SagaState};
pub use self::orchestrator::{SagaError, SagaOrchestrator, SagaStats};
pub use self::step::{
    Compensation, DEFAULT_STEP_TIMEOUT, FnAction, FnCompensation, SagaStep, StepAction,
    StepRetryPolicy, action_fn, compensation_fn,
};
