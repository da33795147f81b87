//! PayloadCodec - 型付き payload と lane 上の JSON の相互変換

use serde_json::Value;

use super::task::TaskPayload;
use crate::domain::{ExecError, Task, TaskType};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("task type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: TaskType },

    #[error("payload json: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<CodecError> for ExecError {
    /// A payload that does not decode will not decode on retry either.
    fn from(e: CodecError) -> Self {
        ExecError::permanent(e.to_string())
    }
}

/// PayloadCodec は T と `(task_type, JSON payload)` を相互変換する
///
/// # デシリアライズフロー
/// 1. task_type が `T::TYPE` と一致するか確認
/// 2. serde_json で T にデシリアライズ
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<T: TaskPayload>(payload: &T) -> Result<(TaskType, Value), serde_json::Error> {
        Ok((TaskType::new(T::TYPE), serde_json::to_value(payload)?))
    }

    pub fn decode<T: TaskPayload>(task: &Task) -> Result<T, CodecError> {
        if task.task_type.as_str() != T::TYPE {
            return Err(CodecError::TypeMismatch {
                expected: T::TYPE,
                found: task.task_type.clone(),
            });
        }
        Ok(serde_json::from_value(task.payload.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, TaskId};
    use crate::typed::task::fixtures::{Add, Greet};
    use chrono::Utc;
    use ulid::Ulid;

    fn task_for(task_type: TaskType, payload: Value) -> Task {
        Task::new(
            TaskId::from_ulid(Ulid::new()),
            task_type,
            payload,
            Priority::Normal,
            3,
            Utc::now(),
        )
    }

    #[test]
    fn encode_then_decode() {
        let (task_type, payload) = PayloadCodec::encode(&Add { a: 1, b: 2 }).unwrap();
        assert_eq!(task_type.as_str(), Add::TYPE);

        let task = task_for(task_type, payload);
        assert_eq!(PayloadCodec::decode::<Add>(&task).unwrap(), Add { a: 1, b: 2 });
    }

    #[test]
    fn wrong_type_is_rejected() {
        let (task_type, payload) = PayloadCodec::encode(&Add { a: 1, b: 2 }).unwrap();
        let task = task_for(task_type, payload);

        let err = PayloadCodec::decode::<Greet>(&task).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { .. }));
        assert_eq!(ExecError::from(err).kind, crate::domain::ErrorKind::Permanent);
    }
}
