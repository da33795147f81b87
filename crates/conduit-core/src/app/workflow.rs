//! WorkflowHandler - saga を 1 つのタスクとして実行する DynHandler
//!
//! # フロー
//! 1. task id から saga id を導出（同じタスクは常に同じ saga）
//! 2. checkpoint があれば resume、なければ payload を初期 context として execute
//! 3. COMPLETED なら context を結果として返し、FAILED / ABORTED は Permanent エラー
//!
//! dead letter から手動で再投入されたタスクは、前回の FAILED / ABORTED な saga を
//! 破棄して最初からやり直します（同じ task id なので saga id も同じ）。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use crate::domain::{ExecError, SagaId, Task};
use crate::saga::{
    SagaContext, SagaDefinition, SagaError, SagaOrchestrator, SagaResult, SagaState,
};
use crate::typed::DynHandler;

pub struct WorkflowHandler {
    task_type: String,
    definition: Arc<SagaDefinition>,
    orchestrator: Arc<SagaOrchestrator>,
}

impl WorkflowHandler {
    pub fn new(
        task_type: impl Into<String>,
        definition: Arc<SagaDefinition>,
        orchestrator: Arc<SagaOrchestrator>,
    ) -> Self {
        Self {
            task_type: task_type.into(),
            definition,
            orchestrator,
        }
    }

    async fn start(&self, saga_id: SagaId, task: &Task) -> SagaResult {
        self.orchestrator
            .execute_with_id(
                saga_id,
                &self.definition,
                SagaContext::from_value(task.payload.clone()),
            )
            .await
    }

    /// A failed run left behind by the task's life before it was dead-lettered.
    async fn left_over_failure(&self, saga_id: SagaId, task: &Task) -> Result<bool, SagaError> {
        if !task.was_resubmitted() {
            return Ok(false);
        }
        let Some(previous) = self.orchestrator.status(saga_id).await? else {
            return Ok(false);
        };
        let failed = matches!(previous.state, SagaState::Failed | SagaState::Aborted);
        Ok(failed && (task.is_first_delivery() || previous.updated_at < task.created_at))
    }
}

#[async_trait]
impl DynHandler for WorkflowHandler {
    async fn handle_dyn(&self, task: &Task) -> Result<Value, ExecError> {
        let saga_id: SagaId = task.id.cast();
        let infra = |e: SagaError| ExecError::infrastructure(e.to_string());

        if self.left_over_failure(saga_id, task).await.map_err(infra)? {
            info!(task_id = %task.id, saga_id = %saga_id, "resubmitted workflow task, saga starts over");
            self.orchestrator.discard(saga_id).await.map_err(infra)?;
        }

        let result = match self.orchestrator.resume(saga_id, &self.definition).await {
            Ok(result) => {
                info!(task_id = %task.id, saga_id = %saga_id, "workflow task redelivered, resumed saga");
                result
            }
            Err(SagaError::CheckpointNotFound(_)) => self.start(saga_id, task).await,
            Err(e) => return Err(infra(e)),
        };

        match result.state {
            SagaState::Completed => Ok(json!({
                "saga_id": saga_id.to_string(),
                "state": result.state,
                "context": result.context,
            })),
            state => Err(ExecError::permanent(format!(
                "saga {saga_id} ended {state:?}: {}",
                result.error.as_deref().unwrap_or("no error recorded")
            ))),
        }
    }

    fn task_type(&self) -> &str {
        &self.task_type
    }
}
