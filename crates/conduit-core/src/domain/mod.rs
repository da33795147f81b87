//! Domain model (IDs, priority, task, dead letter, errors).
//!
//! ここに置く型は queue / saga / store のどれにも依存しません。

pub mod dead_letter;
pub mod errors;
pub mod ids;
pub mod priority;
pub mod task;

pub use dead_letter::DeadLetterRecord;
pub use errors::{ErrorKind, ExecError};
pub use ids::{SagaId, TaskId};
pub use priority::{Priority, UnknownPriority};
pub use task::{
    AttemptFailure, DEFAULT_MAX_RETRIES, NewTask, RESUBMITTED_AUDIT_PREFIX, Task, TaskType,
};
