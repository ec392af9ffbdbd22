//! In-memory key-value store implementation.
//!
//! Backs tests and the simulated CLI mode. A single shared map plus a
//! broadcast bus are shared by every handle, while each handle carries its
//! own writer id. Two handles therefore behave like two windows over the
//! same persisted state: a write through one is observed as a change event
//! by subscribers of the other.

use async_trait::async_trait;
use sorteo_core::store::{KeyValueStore, StoreEvent};
use sorteo_core::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 64;

struct StoreShared {
    entries: RwLock<HashMap<String, String>>,
    bus: broadcast::Sender<StoreEvent>,
}

/// Shared in-memory store with change notification.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<StoreShared>,
    writer: Uuid,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(StoreShared {
                entries: RwLock::new(HashMap::new()),
                bus,
            }),
            writer: Uuid::new_v4(),
        }
    }

    /// Creates another handle over the same underlying state.
    ///
    /// The new handle shares the map and the event bus but carries a fresh
    /// writer id, so events it emits are distinguishable from this handle's.
    pub fn handle(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            writer: Uuid::new_v4(),
        }
    }

    fn publish(&self, key: &str, value: Option<String>) {
        let event = StoreEvent {
            writer: self.writer,
            key: key.to_string(),
            value,
        };
        // A send error only means nobody is subscribed right now.
        let _ = self.shared.bus.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.shared.entries.read().unwrap();
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        {
            let mut entries = self.shared.entries.write().unwrap();
            entries.insert(key.to_string(), value.to_string());
        }
        self.publish(key, Some(value.to_string()));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let removed = {
            let mut entries = self.shared.entries.write().unwrap();
            entries.remove(key)
        };
        if removed.is_some() {
            self.publish(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.shared.bus.subscribe()
    }

    fn writer_id(&self) -> Uuid {
        self.writer
    }
}
