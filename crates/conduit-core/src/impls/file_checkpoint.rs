//! FileCheckpointStore - saga ごとに JSON ファイル 1 つ
//!
//! # 実装詳細
//! - パスは `{dir}/{saga_id}.json`
//! - 一時ファイルに書いてから rename するので、読み手が書きかけを見ることはない
//! - 同じ saga_id への書き手は 1 つという前提（last-write-wins）

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::domain::SagaId;
use crate::ports::{CheckpointError, CheckpointStore};
use crate::saga::SagaCheckpoint;

#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Use `dir`, creating it if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, saga_id: SagaId) -> PathBuf {
        self.dir.join(format!("{saga_id}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &SagaCheckpoint) -> Result<(), CheckpointError> {
        let path = self.path_for(checkpoint.saga_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(checkpoint)?;

        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        debug!(saga_id = %checkpoint.saga_id, state = ?checkpoint.state, "checkpoint written");
        Ok(())
    }

    async fn load(&self, saga_id: SagaId) -> Result<Option<SagaCheckpoint>, CheckpointError> {
        match fs::read(self.path_for(saga_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, saga_id: SagaId) -> Result<(), CheckpointError> {
        match fs::remove_file(self.path_for(saga_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::{SagaContext, SagaInstance, SagaState};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use ulid::Ulid;

    fn checkpoint() -> SagaCheckpoint {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut instance = SagaInstance::new(
            SagaId::from_ulid(Ulid::new()),
            "signup",
            SagaContext::from_value(json!({"user": "u-1"})),
            now,
        );
        instance.state = SagaState::Running;
        instance.completed_steps = vec!["create_user".to_string()];
        instance.current_step_index = 1;
        SagaCheckpoint::from_instance(&instance)
    }

    #[tokio::test]
    async fn survives_a_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let cp = checkpoint();

        let store = FileCheckpointStore::open(dir.path().join("sagas")).await.unwrap();
        store.save(&cp).await.unwrap();

        let reopened = FileCheckpointStore::open(dir.path().join("sagas")).await.unwrap();
        assert_eq!(reopened.load(cp.saga_id).await.unwrap(), Some(cp.clone()));
        assert!(!reopened.dir().join(format!("{}.json.tmp", cp.saga_id)).exists());
    }

    #[tokio::test]
    async fn missing_and_deleted_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).await.unwrap();
        let cp = checkpoint();

        assert_eq!(store.load(cp.saga_id).await.unwrap(), None);
        store.save(&cp).await.unwrap();
        store.delete(cp.saga_id).await.unwrap();
        store.delete(cp.saga_id).await.unwrap();
        assert_eq!(store.load(cp.saga_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).await.unwrap();
        let cp = checkpoint();
        std::fs::write(dir.path().join(format!("{}.json", cp.saga_id)), b"{").unwrap();

        assert!(matches!(
            store.load(cp.saga_id).await,
            Err(CheckpointError::Serialization(_))
        ));
    }
}
