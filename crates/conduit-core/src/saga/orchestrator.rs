//! SagaOrchestrator - step の実行・checkpoint・逆順補償
//!
//! # フロー
//! 1. IDLE → RUNNING（初回 checkpoint）
//! 2. step ごとに action を timeout 付きで実行（ErrorKind に応じてリトライ）
//! 3. 成功したら context にマージし、completed_steps に追加して checkpoint
//! 4. 最終的に失敗したら COMPENSATING へ遷移し、completed_steps を逆順に補償
//! 5. 補償が 1 つでも失敗すれば ABORTED、すべて成功なら FAILED
//!
//! # 設計原則
//! - グローバルロックなし。saga instance 同士は独立
//! - 1 saga は同時に 1 step しか実行しない
//! - checkpoint が書けなければ前進を止めて補償する（進捗が永続化されないため）
//! - 補償は各 step につき最大 1 回、step の timeout 内で、リトライなし

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{SagaCheckpoint, SagaContext, SagaDefinition, SagaInstance, SagaResult, SagaState, SagaStep};
use crate::domain::{ExecError, SagaId};
use crate::ports::{CheckpointError, CheckpointStore, Clock, IdGenerator};

#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("no checkpoint for saga {0}")]
    CheckpointNotFound(SagaId),

    #[error("checkpoint for saga {saga_id} does not match definition '{definition}': {reason}")]
    CheckpointMismatch {
        saga_id: SagaId,
        definition: String,
        reason: String,
    },
}

/// Snapshot of orchestrator counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStats {
    pub sagas_started: u64,
    pub sagas_resumed: u64,
    pub sagas_completed: u64,
    pub sagas_failed: u64,
    pub sagas_aborted: u64,
    pub steps_executed: u64,
    pub step_retries: u64,
    pub compensations_run: u64,
    pub compensations_failed: u64,
    pub checkpoint_failures: u64,
}

#[derive(Debug, Default)]
struct SagaCounters {
    sagas_started: AtomicU64,
    sagas_resumed: AtomicU64,
    sagas_completed: AtomicU64,
    sagas_failed: AtomicU64,
    sagas_aborted: AtomicU64,
    steps_executed: AtomicU64,
    step_retries: AtomicU64,
    compensations_run: AtomicU64,
    compensations_failed: AtomicU64,
    checkpoint_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::SeqCst);
}

impl SagaCounters {
    fn record_terminal(&self, state: SagaState) {
        match state {
            SagaState::Completed => bump(&self.sagas_completed),
            SagaState::Failed => bump(&self.sagas_failed),
            SagaState::Aborted => bump(&self.sagas_aborted),
            _ => {}
        }
    }

    fn snapshot(&self) -> SagaStats {
        SagaStats {
            sagas_started: self.sagas_started.load(Ordering::SeqCst),
            sagas_resumed: self.sagas_resumed.load(Ordering::SeqCst),
            sagas_completed: self.sagas_completed.load(Ordering::SeqCst),
            sagas_failed: self.sagas_failed.load(Ordering::SeqCst),
            sagas_aborted: self.sagas_aborted.load(Ordering::SeqCst),
            steps_executed: self.steps_executed.load(Ordering::SeqCst),
            step_retries: self.step_retries.load(Ordering::SeqCst),
            compensations_run: self.compensations_run.load(Ordering::SeqCst),
            compensations_failed: self.compensations_failed.load(Ordering::SeqCst),
            checkpoint_failures: self.checkpoint_failures.load(Ordering::SeqCst),
        }
    }
}

pub struct SagaOrchestrator {
    checkpoints: Arc<dyn CheckpointStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    /// Live and recently finished instances. Never held across an await.
    instances: Mutex<HashMap<SagaId, SagaInstance>>,
    counters: SagaCounters,
}

impl SagaOrchestrator {
    pub fn new(
        checkpoints: Arc<dyn CheckpointStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            checkpoints,
            clock,
            ids,
            instances: Mutex::new(HashMap::new()),
            counters: SagaCounters::default(),
        }
    }

    /// Run a new saga under a freshly generated id.
    pub async fn execute(
        &self,
        definition: &SagaDefinition,
        initial_context: SagaContext,
    ) -> SagaResult {
        let saga_id = self.ids.generate_saga_id();
        self.execute_with_id(saga_id, definition, initial_context)
            .await
    }

    /// Run a new saga under a caller-chosen id.
    ///
    /// Store failures never escape: they end the forward pass and the saga
    /// rolls back like any other step failure.
    pub async fn execute_with_id(
        &self,
        saga_id: SagaId,
        definition: &SagaDefinition,
        initial_context: SagaContext,
    ) -> SagaResult {
        bump(&self.counters.sagas_started);
        let mut instance = SagaInstance::new(
            saga_id,
            definition.name(),
            initial_context,
            self.clock.now(),
        );
        info!(saga_id = %saga_id, definition = definition.name(), "saga started");

        instance.state = SagaState::Running;
        if let Err(e) = self.persist(&mut instance).await {
            instance.error = Some(format!("initial checkpoint: {e}"));
            return self.compensate(instance, definition).await;
        }
        self.run_forward(instance, definition).await
    }

    /// Continue a saga from its last checkpoint.
    ///
    /// Completed actions are never executed again. A RUNNING saga continues
    /// with the step after its last completed one; a COMPENSATING saga
    /// continues rolling back; a terminal saga just reports its result.
    pub async fn resume(
        &self,
        saga_id: SagaId,
        definition: &SagaDefinition,
    ) -> Result<SagaResult, SagaError> {
        let checkpoint = self
            .checkpoints
            .load(saga_id)
            .await?
            .ok_or(SagaError::CheckpointNotFound(saga_id))?;
        Self::check_matches(&checkpoint, definition)?;

        let mut instance = checkpoint.to_instance();
        if instance.state.is_terminal() {
            debug!(saga_id = %saga_id, state = ?instance.state, "saga already finished");
            self.remember(&instance);
            return Ok(instance.result());
        }

        bump(&self.counters.sagas_resumed);
        info!(
            saga_id = %saga_id,
            state = ?instance.state,
            completed = instance.completed_steps.len(),
            "resuming saga from checkpoint"
        );
        instance.current_step_index = instance.completed_steps.len();

        let result = match instance.state {
            SagaState::Compensating => self.compensate(instance, definition).await,
            _ => {
                instance.state = SagaState::Running;
                self.run_forward(instance, definition).await
            }
        };
        Ok(result)
    }

    /// In-memory snapshot first, the last checkpoint otherwise.
    pub async fn status(&self, saga_id: SagaId) -> Result<Option<SagaInstance>, SagaError> {
        if let Some(instance) = self.lock_instances().get(&saga_id).cloned() {
            return Ok(Some(instance));
        }
        Ok(self
            .checkpoints
            .load(saga_id)
            .await?
            .map(|cp| cp.to_instance()))
    }

    /// Drop finished sagas (and their checkpoints) not updated for `older_than`.
    pub async fn purge_finished(&self, older_than: Duration) -> Result<usize, SagaError> {
        let now = self.clock.now();
        let expired: Vec<SagaId> = {
            let mut instances = self.lock_instances();
            let expired: Vec<SagaId> = instances
                .values()
                .filter(|i| i.state.is_terminal())
                .filter(|i| {
                    (now - i.updated_at)
                        .to_std()
                        .is_ok_and(|age| age >= older_than)
                })
                .map(|i| i.saga_id)
                .collect();
            for id in &expired {
                instances.remove(id);
            }
            expired
        };

        for saga_id in &expired {
            self.checkpoints.delete(*saga_id).await?;
        }
        if !expired.is_empty() {
            info!(purged = expired.len(), "purged finished sagas");
        }
        Ok(expired.len())
    }

    /// Forget a saga entirely so its id can start over with `execute_with_id`.
    /// The caller must know nothing is running under that id.
    pub async fn discard(&self, saga_id: SagaId) -> Result<(), SagaError> {
        self.lock_instances().remove(&saga_id);
        self.checkpoints.delete(saga_id).await?;
        info!(saga_id = %saga_id, "saga discarded");
        Ok(())
    }

    pub fn stats(&self) -> SagaStats {
        self.counters.snapshot()
    }

    fn check_matches(
        checkpoint: &SagaCheckpoint,
        definition: &SagaDefinition,
    ) -> Result<(), SagaError> {
        let mismatch = |reason: String| SagaError::CheckpointMismatch {
            saga_id: checkpoint.saga_id,
            definition: definition.name().to_string(),
            reason,
        };
        if checkpoint.definition_name != definition.name() {
            return Err(mismatch(format!(
                "checkpoint was written by '{}'",
                checkpoint.definition_name
            )));
        }
        if !definition.is_prefix(&checkpoint.completed_step_names) {
            return Err(mismatch(format!(
                "completed steps {:?} are not a prefix of the definition",
                checkpoint.completed_step_names
            )));
        }
        Ok(())
    }

    async fn run_forward(
        &self,
        mut instance: SagaInstance,
        definition: &SagaDefinition,
    ) -> SagaResult {
        let saga_id = instance.saga_id;
        let start = instance.completed_steps.len();

        for (index, step) in definition.steps().iter().enumerate().skip(start) {
            instance.current_step_index = index;
            debug!(saga_id = %saga_id, step = %step.name, "running step");

            match self.run_action(saga_id, step, &instance.context).await {
                Ok(output) => {
                    bump(&self.counters.steps_executed);
                    instance.context.merge_output(&step.name, output);
                    instance.completed_steps.push(step.name.clone());
                    instance.current_step_index = index + 1;
                    if let Err(e) = self.persist(&mut instance).await {
                        instance.error =
                            Some(format!("checkpoint after step '{}': {e}", step.name));
                        return self.compensate(instance, definition).await;
                    }
                }
                Err(e) => {
                    warn!(saga_id = %saga_id, step = %step.name, error = %e, "step failed");
                    instance.error = Some(format!("step '{}' failed: {e}", step.name));
                    return self.compensate(instance, definition).await;
                }
            }
        }

        instance.state = SagaState::Completed;
        instance.error = None;
        self.finish(instance).await
    }

    /// Run one action with its timeout and retry policy.
    async fn run_action(
        &self,
        saga_id: SagaId,
        step: &SagaStep,
        ctx: &SagaContext,
    ) -> Result<Value, ExecError> {
        let attempts = step.retry_policy.attempts();
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(step.timeout, step.action.execute(ctx)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ExecError::timeout(format!(
                    "step '{}' timed out after {:?}",
                    step.name, step.timeout
                ))),
            };

            match outcome {
                Ok(output) => return Ok(output),
                Err(e) if !e.kind.is_retryable() || attempt >= attempts => return Err(e),
                Err(e) => {
                    let delay = step.retry_policy.backoff.next_delay(attempt);
                    bump(&self.counters.step_retries);
                    warn!(
                        saga_id = %saga_id,
                        step = %step.name,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "step attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Roll back `completed_steps` in reverse and settle on FAILED or ABORTED.
    async fn compensate(
        &self,
        mut instance: SagaInstance,
        definition: &SagaDefinition,
    ) -> SagaResult {
        let saga_id = instance.saga_id;
        instance.state = SagaState::Compensating;
        self.persist_or_warn(&mut instance).await;

        while let Some(name) = instance.completed_steps.last().cloned() {
            let step = definition.step(&name);
            match step.and_then(|s| s.compensation.as_ref().map(|c| (s, c))) {
                None => debug!(saga_id = %saga_id, step = %name, "no compensation, skipping"),
                Some((step, compensation)) => {
                    bump(&self.counters.compensations_run);
                    let outcome =
                        tokio::time::timeout(step.timeout, compensation.compensate(&instance.context))
                            .await;
                    let failure = match outcome {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some(e.to_string()),
                        Err(_) => Some(format!("timed out after {:?}", step.timeout)),
                    };
                    match failure {
                        None => info!(saga_id = %saga_id, step = %name, "step compensated"),
                        Some(reason) => {
                            bump(&self.counters.compensations_failed);
                            error!(
                                saga_id = %saga_id,
                                step = %name,
                                error = %reason,
                                "compensation failed, continuing rollback"
                            );
                            instance.failed_compensations.push(name.clone());
                        }
                    }
                }
            }
            instance.completed_steps.pop();
            instance.current_step_index = instance.completed_steps.len();
            self.persist_or_warn(&mut instance).await;
        }

        instance.state = if instance.failed_compensations.is_empty() {
            SagaState::Failed
        } else {
            SagaState::Aborted
        };
        self.finish(instance).await
    }

    async fn finish(&self, mut instance: SagaInstance) -> SagaResult {
        self.persist_or_warn(&mut instance).await;
        self.counters.record_terminal(instance.state);
        info!(
            saga_id = %instance.saga_id,
            state = ?instance.state,
            failed_compensations = instance.failed_compensations.len(),
            "saga finished"
        );
        instance.result()
    }

    async fn persist(&self, instance: &mut SagaInstance) -> Result<(), CheckpointError> {
        instance.updated_at = self.clock.now();
        self.remember(instance);
        let saved = self
            .checkpoints
            .save(&SagaCheckpoint::from_instance(instance))
            .await;
        if saved.is_err() {
            bump(&self.counters.checkpoint_failures);
        }
        saved
    }

    async fn persist_or_warn(&self, instance: &mut SagaInstance) {
        if let Err(e) = self.persist(instance).await {
            warn!(saga_id = %instance.saga_id, error = %e, "checkpoint write failed");
        }
    }

    fn remember(&self, instance: &SagaInstance) {
        self.lock_instances()
            .insert(instance.saga_id, instance.clone());
    }

    fn lock_instances(&self) -> std::sync::MutexGuard<'_, HashMap<SagaId, SagaInstance>> {
        self.instances.lock().unwrap_or_else(|e| e.into_inner())
    }
}
