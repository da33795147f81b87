//! Saga runtime state: context, state machine, instance snapshot, result.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::SagaId;

/// Saga state.
///
/// State transitions:
/// - Idle -> Running -> Completed
/// - Idle -> Running -> Compensating -> Failed   (every compensation succeeded)
/// - Idle -> Running -> Compensating -> Aborted  (at least one compensation failed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaState {
    Idle,
    Running,
    Compensating,
    Completed,
    Failed,
    Aborted,
}

impl SagaState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::Failed | SagaState::Aborted
        )
    }
}

/// Key/value map threaded through the steps of one saga.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SagaContext(Map<String, Value>);

impl SagaContext {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Objects are used as-is; any other value is kept under `"input"`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            Value::Null => Self::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                Self(map)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.0
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Fold a step's return value into the context.
    ///
    /// Object keys overwrite existing keys, `null` is ignored, and anything
    /// else is stored under the step name.
    pub fn merge_output(&mut self, step_name: &str, output: Value) {
        match output {
            Value::Null => {}
            Value::Object(map) => self.0.extend(map),
            other => {
                self.0.insert(step_name.to_string(), other);
            }
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Read-only snapshot of one saga execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    pub saga_id: SagaId,
    pub definition_ref: String,
    pub state: SagaState,
    pub context: SagaContext,
    /// Always a prefix of the definition's steps, in forward order.
    pub completed_steps: Vec<String>,
    pub current_step_index: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_compensations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaInstance {
    pub fn new(
        saga_id: SagaId,
        definition_ref: impl Into<String>,
        context: SagaContext,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            saga_id,
            definition_ref: definition_ref.into(),
            state: SagaState::Idle,
            context,
            completed_steps: Vec::new(),
            current_step_index: 0,
            failed_compensations: Vec::new(),
            error: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn result(&self) -> SagaResult {
        SagaResult {
            saga_id: self.saga_id,
            state: self.state,
            context: self.context.clone(),
            completed_steps: self.completed_steps.clone(),
            failed_compensations: self.failed_compensations.clone(),
            error: self.error.clone(),
        }
    }
}

/// What `SagaOrchestrator::execute` hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaResult {
    pub saga_id: SagaId,
    pub state: SagaState,
    pub context: SagaContext,
    /// Steps not rolled back (empty once compensation has run).
    pub completed_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_compensations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SagaResult {
    pub fn is_completed(&self) -> bool {
        self.state == SagaState::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_output_handles_each_shape() {
        let mut ctx = SagaContext::from_value(json!({"user": "u-1"}));

        ctx.merge_output("charge", json!({"charge_id": "ch-9", "user": "u-2"}));
        ctx.merge_output("noop", Value::Null);
        ctx.merge_output("count", json!(3));

        assert_eq!(ctx.get("charge_id"), Some(&json!("ch-9")));
        assert_eq!(ctx.get("user"), Some(&json!("u-2")));
        assert_eq!(ctx.get("count"), Some(&json!(3)));
        assert!(ctx.get("noop").is_none());
    }

    #[test]
    fn non_object_input_is_wrapped() {
        let ctx = SagaContext::from_value(json!([1, 2]));
        assert_eq!(ctx.get("input"), Some(&json!([1, 2])));
        assert!(SagaContext::from_value(Value::Null).as_map().is_empty());
    }

    #[test]
    fn typed_lookup() {
        let ctx = SagaContext::from_value(json!({"amount": 42}));
        assert_eq!(ctx.get_as::<u32>("amount").unwrap(), Some(42));
        assert_eq!(ctx.get_as::<u32>("missing").unwrap(), None);
        assert!(ctx.get_as::<String>("amount").is_err());
    }

    #[test]
    fn state_serializes_upper_case() {
        assert_eq!(
            serde_json::to_string(&SagaState::Compensating).unwrap(),
            "\"COMPENSATING\""
        );
        assert!(SagaState::Aborted.is_terminal());
        assert!(!SagaState::Running.is_terminal());
    }
}
