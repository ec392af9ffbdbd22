//! Shared key-value storage interface.
//!
//! Models the same-origin storage boundary: string records under fixed
//! keys, readable and writable by every handle ("tab"), with change
//! notifications delivered as an inbound message channel. The notification
//! mechanism is part of this abstraction so the underlying primitive
//! (in-process broadcast, file watcher, browser storage events) can be
//! swapped without touching the session store's logic.

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

/// A change notification for one stored key.
///
/// Delivered to every subscriber, including the handle that performed the
/// write; consumers compare `writer` against their own id to skip their own
/// writes.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    /// Id of the handle that wrote.
    pub writer: Uuid,
    /// Key that changed.
    pub key: String,
    /// New value, or `None` when the key was removed.
    pub value: Option<String>,
}

/// Shared string storage with change notifications.
///
/// Mutation goes through `set`/`remove` only; implementations must publish
/// a [`StoreEvent`] for every successful mutation.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads the value under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes `value` under `key` and notifies subscribers.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key` and notifies subscribers.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Subscribes to change events for the whole store.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;

    /// Identity of this handle, used to recognize its own events.
    fn writer_id(&self) -> Uuid;
}
