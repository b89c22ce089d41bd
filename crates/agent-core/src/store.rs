//! Persisted session state
//!
//! A single record survives a reload: the agent's last intended status. It is
//! read once when a coordinator starts and cleared when the session ends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::CoordinatorResult;
use crate::status::AgentStatus;

/// The persisted record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedPresence {
    pub status: AgentStatus,
    pub saved_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> CoordinatorResult<Option<PersistedPresence>>;

    async fn save(&self, status: AgentStatus) -> CoordinatorResult<()>;

    async fn clear(&self) -> CoordinatorResult<()>;

    async fn load_status(&self) -> CoordinatorResult<Option<AgentStatus>> {
        Ok(self.load().await?.map(|p| p.status))
    }
}

/// Store that lives as long as the process
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<PersistedPresence>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(status: AgentStatus) -> Self {
        Self {
            record: Mutex::new(Some(PersistedPresence {
                status,
                saved_at: Utc::now(),
            })),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> CoordinatorResult<Option<PersistedPresence>> {
        Ok(self.record.lock().clone())
    }

    async fn save(&self, status: AgentStatus) -> CoordinatorResult<()> {
        *self.record.lock() = Some(PersistedPresence {
            status,
            saved_at: Utc::now(),
        });
        Ok(())
    }

    async fn clear(&self) -> CoordinatorResult<()> {
        *self.record.lock() = None;
        Ok(())
    }
}

/// Store backed by a small JSON file
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> CoordinatorResult<Option<PersistedPresence>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, status: AgentStatus) -> CoordinatorResult<()> {
        let record = PersistedPresence {
            status,
            saved_at: Utc::now(),
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&record)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), status = %status, "Persisted agent status");
        Ok(())
    }

    async fn clear(&self) -> CoordinatorResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoordinatorError;
    use serial_test::serial;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemorySessionStore::new();
        assert_eq!(store.load_status().await.unwrap(), None);
        store.save(AgentStatus::Break).await.unwrap();
        assert_eq!(store.load_status().await.unwrap(), Some(AgentStatus::Break));
        store.clear().await.unwrap();
        assert_eq!(store.load_status().await.unwrap(), None);
    }

    #[tokio::test]
    #[serial]
    async fn file_store_survives_a_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session").join("presence.json");

        FileSessionStore::new(&path).save(AgentStatus::Available).await.unwrap();
        let reloaded = FileSessionStore::new(&path);
        assert_eq!(reloaded.load_status().await.unwrap(), Some(AgentStatus::Available));

        reloaded.clear().await.unwrap();
        reloaded.clear().await.unwrap();
        assert_eq!(reloaded.load_status().await.unwrap(), None);
    }

    #[tokio::test]
    #[serial]
    async fn corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presence.json");
        std::fs::write(&path, b"not json").unwrap();

        let err = FileSessionStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Storage { .. }));
    }
}
