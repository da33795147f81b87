//! CheckpointStore port - saga の進捗の永続化
//!
//! # 設計原則
//! - saga_id ごとに last-write-wins（上書き）
//! - 1 saga instance に書き手は 1 つ（同じ saga_id への並行書き込みは想定しない）
//! - orchestrator は step 遷移のたびに save し、起動時に 1 回 load する

use async_trait::async_trait;

use crate::domain::SagaId;
use crate::saga::SagaCheckpoint;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),

    #[error("checkpoint io: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &SagaCheckpoint) -> Result<(), CheckpointError>;

    async fn load(&self, saga_id: SagaId) -> Result<Option<SagaCheckpoint>, CheckpointError>;

    /// Removing a missing checkpoint is not an error.
    async fn delete(&self, saga_id: SagaId) -> Result<(), CheckpointError>;
}
