//! SagaCheckpoint - saga 進捗のスナップショット
//!
//! step の完了・補償のたびに書き込み、再起動時に 1 回読み込みます。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{SagaContext, SagaInstance, SagaState};
use crate::domain::SagaId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaCheckpoint {
    pub saga_id: SagaId,
    pub definition_name: String,
    pub state: SagaState,
    pub completed_step_names: Vec<String>,
    pub current_step_index: usize,
    pub context_snapshot: SagaContext,
    #[serde(default)]
    pub failed_compensations: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SagaCheckpoint {
    pub fn from_instance(instance: &SagaInstance) -> Self {
        Self {
            saga_id: instance.saga_id,
            definition_name: instance.definition_ref.clone(),
            state: instance.state,
            completed_step_names: instance.completed_steps.clone(),
            current_step_index: instance.current_step_index,
            context_snapshot: instance.context.clone(),
            failed_compensations: instance.failed_compensations.clone(),
            error: instance.error.clone(),
            updated_at: instance.updated_at,
        }
    }

    /// Rebuild an instance snapshot. The start time is not persisted, so the
    /// checkpoint time stands in for it.
    pub fn to_instance(&self) -> SagaInstance {
        SagaInstance {
            saga_id: self.saga_id,
            definition_ref: self.definition_name.clone(),
            state: self.state,
            context: self.context_snapshot.clone(),
            completed_steps: self.completed_step_names.clone(),
            current_step_index: self.current_step_index,
            failed_compensations: self.failed_compensations.clone(),
            error: self.error.clone(),
            started_at: self.updated_at,
            updated_at: self.updated_at,
        }
    }

    /// A non-terminal checkpoint nobody has touched for `max_age` most likely
    /// belongs to a crashed orchestrator.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        (now - self.updated_at)
            .to_std()
            .map(|age| age > max_age)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn checkpoint(state: SagaState) -> SagaCheckpoint {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut instance = SagaInstance::new(
            SagaId::from_ulid(Ulid::new()),
            "signup",
            SagaContext::new(),
            now,
        );
        instance.state = state;
        instance.completed_steps = vec!["create_user".to_string()];
        instance.current_step_index = 1;
        SagaCheckpoint::from_instance(&instance)
    }

    #[test]
    fn staleness_only_applies_to_live_sagas() {
        let running = checkpoint(SagaState::Running);
        let done = checkpoint(SagaState::Completed);
        let later = running.updated_at + chrono::Duration::minutes(10);

        assert!(running.is_stale(later, Duration::from_secs(60)));
        assert!(!running.is_stale(later, Duration::from_secs(3600)));
        assert!(!done.is_stale(later, Duration::from_secs(60)));
    }

    #[test]
    fn instance_roundtrip_keeps_progress() {
        let cp = checkpoint(SagaState::Running);
        let instance = cp.to_instance();
        assert_eq!(instance.completed_steps, vec!["create_user".to_string()]);
        assert_eq!(instance.current_step_index, 1);
        assert_eq!(SagaCheckpoint::from_instance(&instance), cp);
    }
}
