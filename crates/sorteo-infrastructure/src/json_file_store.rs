//! File-backed key-value store implementation.
//!
//! Persists the store map as a single JSON document through
//! [`AtomicJsonFile`], so session state survives process restarts. Change
//! events are delivered on an in-process broadcast bus shared by all
//! handles of the same store.

use crate::storage::{AtomicJsonError, AtomicJsonFile};
use async_trait::async_trait;
use sorteo_core::store::{KeyValueStore, StoreEvent};
use sorteo_core::{Result, WalletError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Key-value store persisted to a JSON file.
pub struct JsonFileStore {
    file: Arc<AtomicJsonFile<HashMap<String, String>>>,
    bus: broadcast::Sender<StoreEvent>,
    writer: Uuid,
}

impl JsonFileStore {
    /// Creates a store over the given file path.
    ///
    /// The file is created lazily on first write.
    pub fn new(path: PathBuf) -> Self {
        let (bus, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            file: Arc::new(AtomicJsonFile::new(path)),
            bus,
            writer: Uuid::new_v4(),
        }
    }

    /// Creates a store at the platform default state file location.
    pub fn at_default_location() -> Result<Self> {
        let path = crate::paths::SorteoPaths::state_file()
            .map_err(|e| WalletError::storage(e.to_string()))?;
        Ok(Self::new(path))
    }

    /// Creates another handle over the same file and event bus.
    ///
    /// The new handle carries a fresh writer id.
    pub fn handle(&self) -> Self {
        Self {
            file: Arc::clone(&self.file),
            bus: self.bus.clone(),
            writer: Uuid::new_v4(),
        }
    }

    fn publish(&self, key: &str, value: Option<String>) {
        let event = StoreEvent {
            writer: self.writer,
            key: key.to_string(),
            value,
        };
        let _ = self.bus.send(event);
    }
}

fn storage_err(e: AtomicJsonError) -> WalletError {
    WalletError::storage(e.to_string())
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self.file.load().map_err(storage_err)?.unwrap_or_default();
        Ok(map.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.file
            .update(HashMap::new(), |map| {
                map.insert(key.to_string(), value.to_string());
                Ok(())
            })
            .map_err(storage_err)?;
        self.publish(key, Some(value.to_string()));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut removed = false;
        self.file
            .update(HashMap::new(), |map| {
                removed = map.remove(key).is_some();
                Ok(())
            })
            .map_err(storage_err)?;
        if removed {
            self.publish(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.bus.subscribe()
    }

    fn writer_id(&self) -> Uuid {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");

        let store = JsonFileStore::new(path.clone());
        store.set("session", "{}").await.unwrap();

        let reopened = JsonFileStore::new(path);
        assert_eq!(
            reopened.get("session").await.unwrap(),
            Some("{}".to_string())
        );
    }

    #[tokio::test]
    async fn test_remove_deletes_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("state.json"));

        store.set("k", "v").await.unwrap();
        store.remove("k").await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_handles_share_event_bus() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("state.json"));
        let other = store.handle();

        let mut events = other.subscribe();
        store.set("k", "v").await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.writer, store.writer_id());
        assert_ne!(event.writer, other.writer_id());
    }

    #[tokio::test]
    async fn test_get_missing_key_on_fresh_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("state.json"));

        assert_eq!(store.get("absent").await.unwrap(), None);
    }
}
