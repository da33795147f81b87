//! InMemoryCheckpointStore - テスト用の checkpoint store
//!
//! プロセスが落ちれば消えるので、再開の検証には同じインスタンスを使い回します。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::SagaId;
use crate::ports::{CheckpointError, CheckpointStore};
use crate::saga::SagaCheckpoint;

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<SagaId, SagaCheckpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &SagaCheckpoint) -> Result<(), CheckpointError> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.saga_id, checkpoint.clone());
        Ok(())
    }

    async fn load(&self, saga_id: SagaId) -> Result<Option<SagaCheckpoint>, CheckpointError> {
        Ok(self.checkpoints.read().await.get(&saga_id).cloned())
    }

    async fn delete(&self, saga_id: SagaId) -> Result<(), CheckpointError> {
        self.checkpoints.write().await.remove(&saga_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::{SagaContext, SagaInstance, SagaState};
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    #[tokio::test]
    async fn last_write_wins() {
        let store = InMemoryCheckpointStore::new();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut instance = SagaInstance::new(
            SagaId::from_ulid(Ulid::new()),
            "signup",
            SagaContext::new(),
            now,
        );
        instance.state = SagaState::Running;
        store.save(&SagaCheckpoint::from_instance(&instance)).await.unwrap();
        instance.state = SagaState::Completed;
        store.save(&SagaCheckpoint::from_instance(&instance)).await.unwrap();

        let loaded = store.load(instance.saga_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, SagaState::Completed);
        assert_eq!(store.len().await, 1);

        store.delete(instance.saga_id).await.unwrap();
        store.delete(instance.saga_id).await.unwrap();
        assert!(store.is_empty().await);
    }
}
