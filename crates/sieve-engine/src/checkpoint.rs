//! Resumable progress per (script, input source) pair.
//!
//! The scheduler reads the stored offset once at construction and upserts it
//! periodically while running. [`FileCheckpointStore`] keeps every record in
//! one JSON array file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sieve_types::{CheckpointRecord, Result, SieveError};

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, script_name: &str, input_source: &str) -> Result<Option<CheckpointRecord>>;
    async fn upsert(&self, record: CheckpointRecord) -> Result<()>;
}

pub struct FileCheckpointStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<CheckpointRecord>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let json = tokio::fs::read_to_string(&self.path).await?;
        if json.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&json).map_err(|e| {
            SieveError::Checkpoint(format!("{} is not a checkpoint file: {}", self.path.display(), e))
        })
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, script_name: &str, input_source: &str) -> Result<Option<CheckpointRecord>> {
        let _guard = self.lock.lock().await;
        let records = self.read_all().await?;
        Ok(records
            .into_iter()
            .find(|r| r.is_for(script_name, input_source)))
    }

    async fn upsert(&self, record: CheckpointRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        match records
            .iter_mut()
            .find(|r| r.is_for(&record.script_name, &record.input_source))
        {
            Some(existing) => *existing = record,
            None => records.push(record),
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&records)?;
        tokio::fs::write(&self.path, json).await?;
        tracing::debug!(path = %self.path.display(), "Checkpoint saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_has_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoints.json"));
        assert!(store.get("demo", "words.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_matching_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("state/checkpoints.json"));

        store.upsert(CheckpointRecord::new("demo", "words.txt", 10)).await.unwrap();
        store.upsert(CheckpointRecord::new("demo", "other.txt", 3)).await.unwrap();
        store.upsert(CheckpointRecord::new("demo", "words.txt", 25)).await.unwrap();

        let record = store.get("demo", "words.txt").await.unwrap().unwrap();
        assert_eq!(record.progress, 25);
        assert_eq!(store.get("demo", "other.txt").await.unwrap().unwrap().progress, 3);

        let json = tokio::fs::read_to_string(store.path()).await.unwrap();
        let all: Vec<CheckpointRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(all.len(), 2);
        assert!(json.contains("\"scriptName\""));
    }

    #[tokio::test]
    async fn corrupt_file_is_checkpoint_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        let store = FileCheckpointStore::new(&path);
        let err = store.get("demo", "w").await.unwrap_err();
        assert!(matches!(err, SieveError::Checkpoint(_)));
    }
}
