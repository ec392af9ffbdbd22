//! Wallet session lifecycle and persistence.
//!
//! `SessionStore` owns the single persisted session record: creation after
//! authentication, validated restore on startup, activity-driven refresh,
//! and teardown. Every mutation is written through to the shared
//! [`KeyValueStore`] under [`SESSION_KEY`], so other handles of the same
//! store observe it; a background listener turns their raw store events
//! into typed [`SessionEvent`]s for this handle.

use chrono::Utc;
use sorteo_core::config::EngineConfig;
use sorteo_core::fingerprint::{FingerprintSnapshot, FingerprintSource};
use sorteo_core::session::{CreateOpts, Session};
use sorteo_core::store::{KeyValueStore, StoreEvent};
use sorteo_core::{Result, SessionInvalidReason, WalletError};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Storage key holding the serialized session record.
pub const SESSION_KEY: &str = "sorteo.wallet_session";

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// A session change caused by another handle of the shared store.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Another handle stored a session this handle now follows. Emitted
    /// both when this handle had no session and when it held an older
    /// record for the same wallet; a byte-identical record is followed
    /// silently.
    Adopted(Session),
    /// Another handle stored a session for a different wallet. The local
    /// session is kept untouched until the conflict is resolved by
    /// [`SessionStore::adopt_remote`] or a disconnect.
    ConflictDetected {
        current: Session,
        incoming: Session,
    },
    /// Another handle removed the session.
    ClearedElsewhere,
}

/// Partial update applied to the current session.
///
/// Absent fields keep their value. The nested `Option` for `mock_user_id`
/// distinguishes "leave as is" from "clear".
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub auto_connect: Option<bool>,
    pub mock_user_id: Option<Option<String>>,
}

/// Result of one [`SessionStore::restore`] pass.
///
/// The distinction between "nothing stored" and "stored but rejected"
/// matters to callers: a purged record carries the
/// [`SessionInvalidReason`] the user should be told about.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    /// A valid session was loaded into memory.
    Restored(Session),
    /// No record was stored.
    Empty,
    /// A record existed, failed validation, and was purged from storage.
    Purged(SessionInvalidReason),
}

impl RestoreOutcome {
    /// The restored session, when the pass produced one.
    pub fn session(self) -> Option<Session> {
        match self {
            Self::Restored(session) => Some(session),
            _ => None,
        }
    }

    /// The rejection reason, when the pass purged a record.
    pub fn invalid_reason(&self) -> Option<SessionInvalidReason> {
        match self {
            Self::Purged(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Manages the persisted wallet session and its cross-handle agreement.
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    device: FingerprintSnapshot,
    ttl: chrono::Duration,
    activity_min: chrono::Duration,
    /// In-memory copy of the persisted record.
    current: Arc<RwLock<Option<Session>>>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    listener: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionStore {
    /// Creates a store over the shared storage backend.
    ///
    /// Captures the device fingerprint once and spawns the store-event
    /// listener; call [`SessionStore::shutdown`] to stop it.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        fingerprint: &dyn FingerprintSource,
        config: &EngineConfig,
    ) -> Self {
        let device = fingerprint.capture();
        let current = Arc::new(RwLock::new(None));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let listener = spawn_listener(
            store.subscribe(),
            store.writer_id(),
            device.clone(),
            Arc::clone(&current),
            events.clone(),
            cancel.clone(),
        );

        Self {
            store,
            device,
            ttl: config.session_ttl(),
            activity_min: config.activity_refresh_min(),
            current,
            events,
            cancel,
            listener: std::sync::Mutex::new(Some(listener)),
        }
    }

    /// The fingerprint sessions created by this store are bound to.
    pub fn device(&self) -> &FingerprintSnapshot {
        &self.device
    }

    /// Subscribes to cross-handle session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Creates and persists a session for `wallet_address`.
    ///
    /// Write-through: the record lands in storage before the in-memory
    /// copy changes, so a storage failure leaves no half-created state.
    pub async fn create(&self, wallet_address: &str, opts: CreateOpts) -> Result<Session> {
        let session = Session::new(wallet_address, self.device.clone(), self.ttl, opts);
        self.persist(&session).await?;
        *self.current.write().await = Some(session.clone());
        tracing::info!(address = %session.wallet_address, "session created");
        Ok(session)
    }

    /// Loads and validates the persisted session.
    ///
    /// Any record that fails validation (unparseable, wrong schema
    /// version, expired, or bound to another device) is purged from
    /// storage and reported through [`RestoreOutcome::Purged`] with the
    /// failing reason; an unparseable record counts as corrupted. Storage
    /// access failures propagate. Idempotent between writes: a second
    /// call after a purge sees an empty store.
    pub async fn restore(&self) -> Result<RestoreOutcome> {
        let raw = match self.store.get(SESSION_KEY).await? {
            Some(raw) => raw,
            None => {
                *self.current.write().await = None;
                return Ok(RestoreOutcome::Empty);
            }
        };

        let session: Session = match serde_json::from_str(&raw) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("purging unparseable session record: {}", e);
                self.purge().await?;
                return Ok(RestoreOutcome::Purged(SessionInvalidReason::Corrupted));
            }
        };

        if let Err(reason) = session.validate_at(Utc::now(), &self.device) {
            tracing::info!(%reason, "purging invalid session");
            self.purge().await?;
            return Ok(RestoreOutcome::Purged(reason));
        }

        *self.current.write().await = Some(session.clone());
        tracing::debug!(address = %session.wallet_address, "session restored");
        Ok(RestoreOutcome::Restored(session))
    }

    /// The in-memory session, if any.
    pub async fn current(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    /// Applies a partial update to the current session and persists it.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no active session or the write fails.
    pub async fn update(&self, patch: SessionPatch) -> Result<Session> {
        let mut updated = self
            .current()
            .await
            .ok_or_else(|| WalletError::internal("no active session to update"))?;

        if let Some(auto_connect) = patch.auto_connect {
            updated.auto_connect = auto_connect;
        }
        if let Some(mock_user_id) = patch.mock_user_id {
            updated.mock_user_id = mock_user_id;
        }

        self.persist(&updated).await?;
        *self.current.write().await = Some(updated.clone());
        Ok(updated)
    }

    /// Extends the session lifetime from now and persists it.
    ///
    /// Returns the refreshed session, or `None` when there is none.
    pub async fn refresh(&self) -> Result<Option<Session>> {
        let Some(mut session) = self.current().await else {
            return Ok(None);
        };
        session.touch(Utc::now(), self.ttl);
        self.persist(&session).await?;
        *self.current.write().await = Some(session.clone());
        tracing::debug!(address = %session.wallet_address, "session refreshed");
        Ok(Some(session))
    }

    /// Refreshes the session in response to user activity, rate limited.
    ///
    /// Activity inside the minimum interval since the last bump is
    /// ignored so bursts of interaction do not turn into storage writes.
    ///
    /// # Returns
    ///
    /// Whether a refresh was actually performed.
    pub async fn touch_activity(&self) -> Result<bool> {
        let Some(session) = self.current().await else {
            return Ok(false);
        };
        if Utc::now() - session.last_accessed_at < self.activity_min {
            return Ok(false);
        }
        self.refresh().await?;
        Ok(true)
    }

    /// Removes the session from memory and storage.
    ///
    /// Memory is cleared first so the handle is signed out locally even if
    /// the storage removal fails; the failure still propagates.
    pub async fn clear(&self) -> Result<()> {
        *self.current.write().await = None;
        self.store.remove(SESSION_KEY).await?;
        tracing::info!("session cleared");
        Ok(())
    }

    /// Time since the current session was created.
    pub async fn age(&self) -> Option<chrono::Duration> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|s| s.age_at(Utc::now()))
    }

    /// Accepts the session another handle stored, replacing the local one.
    ///
    /// Resolution path for [`SessionEvent::ConflictDetected`].
    pub async fn adopt_remote(&self) -> Result<Session> {
        match self.restore().await? {
            RestoreOutcome::Restored(session) => Ok(session),
            RestoreOutcome::Empty => Err(WalletError::internal("no remote session to adopt")),
            RestoreOutcome::Purged(reason) => Err(WalletError::SessionInvalid(reason)),
        }
    }

    /// Stops the store-event listener.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.listener.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn persist(&self, session: &Session) -> Result<()> {
        let raw = serde_json::to_string(session)?;
        self.store.set(SESSION_KEY, &raw).await
    }

    async fn purge(&self) -> Result<()> {
        *self.current.write().await = None;
        self.store.remove(SESSION_KEY).await
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_listener(
    mut store_events: broadcast::Receiver<StoreEvent>,
    own_writer: Uuid,
    device: FingerprintSnapshot,
    current: Arc<RwLock<Option<Session>>>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = store_events.recv() => match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "session store listener lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            apply_remote_event(event, own_writer, &device, &current, &events).await;
        }
    })
}

/// Folds one raw store event into the local session view.
async fn apply_remote_event(
    event: StoreEvent,
    own_writer: Uuid,
    device: &FingerprintSnapshot,
    current: &RwLock<Option<Session>>,
    events: &broadcast::Sender<SessionEvent>,
) {
    if event.writer == own_writer || event.key != SESSION_KEY {
        return;
    }

    let Some(raw) = event.value else {
        let had_session = current.write().await.take().is_some();
        if had_session {
            tracing::info!("session cleared by another handle");
            let _ = events.send(SessionEvent::ClearedElsewhere);
        }
        return;
    };

    let incoming: Session = match serde_json::from_str(&raw) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!("ignoring unparseable remote session: {}", e);
            return;
        }
    };
    if let Err(reason) = incoming.validate_at(Utc::now(), device) {
        tracing::warn!(%reason, "ignoring invalid remote session");
        return;
    }

    let mut guard = current.write().await;
    match guard.as_ref() {
        Some(local) if local.wallet_address != incoming.wallet_address => {
            let conflict = SessionEvent::ConflictDetected {
                current: local.clone(),
                incoming,
            };
            drop(guard);
            let _ = events.send(conflict);
        }
        // Already holding this exact record (typically the echo of a write
        // this handle just restored). Nothing changed, so no event.
        Some(local) if *local == incoming => {}
        _ => {
            *guard = Some(incoming.clone());
            drop(guard);
            tracing::debug!(address = %incoming.wallet_address, "session adopted from another handle");
            let _ = events.send(SessionEvent::Adopted(incoming));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sorteo_core::fingerprint::FixedFingerprint;
    use sorteo_infrastructure::MemoryStore;
    use std::time::Duration as StdDuration;
    use tokio::time::timeout;

    fn fingerprint() -> FingerprintSnapshot {
        FingerprintSnapshot::new((1920, 1080), "UTC", "en-US", "linux-x86_64")
    }

    fn config(ttl_secs: u64, activity_secs: u64) -> EngineConfig {
        EngineConfig {
            session_ttl_secs: ttl_secs,
            activity_refresh_min_secs: activity_secs,
            ..EngineConfig::default()
        }
    }

    fn store_over(backend: MemoryStore, snapshot: FingerprintSnapshot) -> SessionStore {
        SessionStore::new(
            Arc::new(backend),
            &FixedFingerprint(snapshot),
            &config(3600, 60),
        )
    }

    async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
        timeout(StdDuration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_create_then_restore_round_trip() {
        let backend = MemoryStore::new();
        let writer = store_over(backend.handle(), fingerprint());
        let reader = store_over(backend, fingerprint());

        let created = writer
            .create("0xabc", CreateOpts { auto_connect: true, mock_user_id: None })
            .await
            .unwrap();

        let restored = reader.restore().await.unwrap().session().unwrap();
        assert_eq!(restored, created);
        assert_eq!(reader.current().await, Some(created));
    }

    #[tokio::test]
    async fn test_restore_with_nothing_stored() {
        let store = store_over(MemoryStore::new(), fingerprint());
        assert_eq!(store.restore().await.unwrap(), RestoreOutcome::Empty);
    }

    #[tokio::test]
    async fn test_restore_purges_expired_record() {
        let backend = MemoryStore::new();
        let store = store_over(backend.handle(), fingerprint());

        let mut session = Session::new(
            "0xabc",
            fingerprint(),
            chrono::Duration::hours(1),
            CreateOpts::default(),
        );
        session.created_at = Utc::now() - chrono::Duration::hours(3);
        session.last_accessed_at = session.created_at;
        session.expires_at = Utc::now() - chrono::Duration::hours(1);
        backend
            .set(SESSION_KEY, &serde_json::to_string(&session).unwrap())
            .await
            .unwrap();

        assert_eq!(
            store.restore().await.unwrap(),
            RestoreOutcome::Purged(SessionInvalidReason::Expired)
        );
        assert_eq!(backend.get(SESSION_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_restore_purges_fingerprint_mismatch() {
        let backend = MemoryStore::new();
        let writer = store_over(backend.handle(), fingerprint());
        writer.create("0xabc", CreateOpts::default()).await.unwrap();

        let other_device =
            FingerprintSnapshot::new((1280, 720), "UTC", "en-US", "linux-x86_64");
        let reader = store_over(backend.handle(), other_device);

        assert_eq!(
            reader.restore().await.unwrap(),
            RestoreOutcome::Purged(SessionInvalidReason::FingerprintMismatch)
        );
        assert_eq!(backend.get(SESSION_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_restore_purges_unparseable_record() {
        let backend = MemoryStore::new();
        backend.set(SESSION_KEY, "{not json").await.unwrap();
        let store = store_over(backend.handle(), fingerprint());

        assert_eq!(
            store.restore().await.unwrap(),
            RestoreOutcome::Purged(SessionInvalidReason::Corrupted)
        );
        assert_eq!(backend.get(SESSION_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_restore_purges_unknown_schema_version() {
        let backend = MemoryStore::new();
        let mut session = Session::new(
            "0xabc",
            fingerprint(),
            chrono::Duration::hours(1),
            CreateOpts::default(),
        );
        session.version = "1".to_string();
        backend
            .set(SESSION_KEY, &serde_json::to_string(&session).unwrap())
            .await
            .unwrap();

        let store = store_over(backend.handle(), fingerprint());
        assert_eq!(
            store.restore().await.unwrap(),
            RestoreOutcome::Purged(SessionInvalidReason::Corrupted)
        );
        assert_eq!(backend.get(SESSION_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_restore_idempotent_after_purge() {
        let backend = MemoryStore::new();
        let store = store_over(backend.handle(), fingerprint());

        let mut session = Session::new(
            "0xabc",
            fingerprint(),
            chrono::Duration::hours(1),
            CreateOpts::default(),
        );
        session.created_at = Utc::now() - chrono::Duration::hours(3);
        session.last_accessed_at = session.created_at;
        session.expires_at = Utc::now() - chrono::Duration::hours(1);
        backend
            .set(SESSION_KEY, &serde_json::to_string(&session).unwrap())
            .await
            .unwrap();

        assert_eq!(
            store.restore().await.unwrap(),
            RestoreOutcome::Purged(SessionInvalidReason::Expired)
        );
        // The purge emptied storage, so a second pass reports nothing
        // rather than repeating the rejection.
        assert_eq!(store.restore().await.unwrap(), RestoreOutcome::Empty);
    }

    #[tokio::test]
    async fn test_update_patch_persists() {
        let backend = MemoryStore::new();
        let store = store_over(backend.handle(), fingerprint());
        store
            .create("0xabc", CreateOpts { auto_connect: true, mock_user_id: None })
            .await
            .unwrap();

        let updated = store
            .update(SessionPatch {
                auto_connect: Some(false),
                mock_user_id: Some(Some("luna".to_string())),
            })
            .await
            .unwrap();
        assert!(!updated.auto_connect);
        assert_eq!(updated.mock_user_id.as_deref(), Some("luna"));

        let reader = store_over(backend, fingerprint());
        let restored = reader.restore().await.unwrap().session().unwrap();
        assert!(!restored.auto_connect);
        assert_eq!(restored.mock_user_id.as_deref(), Some("luna"));
    }

    #[tokio::test]
    async fn test_update_without_session_fails() {
        let store = store_over(MemoryStore::new(), fingerprint());
        assert!(store.update(SessionPatch::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_extends_expiry() {
        let store = store_over(MemoryStore::new(), fingerprint());
        let created = store.create("0xabc", CreateOpts::default()).await.unwrap();

        let refreshed = store.refresh().await.unwrap().unwrap();
        assert!(refreshed.expires_at >= created.expires_at);
        assert!(refreshed.last_accessed_at >= created.last_accessed_at);
        assert_eq!(refreshed.session_id, created.session_id);
    }

    #[tokio::test]
    async fn test_touch_activity_is_rate_limited() {
        let backend = MemoryStore::new();
        let store = SessionStore::new(
            Arc::new(backend.handle()),
            &FixedFingerprint(fingerprint()),
            &config(3600, 60),
        );
        store.create("0xabc", CreateOpts::default()).await.unwrap();

        // Just created, so the last bump is too recent.
        assert!(!store.touch_activity().await.unwrap());

        let eager = SessionStore::new(
            Arc::new(backend),
            &FixedFingerprint(fingerprint()),
            &config(3600, 0),
        );
        eager.restore().await.unwrap();
        assert!(eager.touch_activity().await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_removes_record() {
        let backend = MemoryStore::new();
        let store = store_over(backend.handle(), fingerprint());
        store.create("0xabc", CreateOpts::default()).await.unwrap();

        store.clear().await.unwrap();

        assert_eq!(store.current().await, None);
        assert_eq!(backend.get(SESSION_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_age_tracks_creation() {
        let store = store_over(MemoryStore::new(), fingerprint());
        assert!(store.age().await.is_none());
        store.create("0xabc", CreateOpts::default()).await.unwrap();
        assert!(store.age().await.unwrap() >= chrono::Duration::zero());
    }

    #[tokio::test]
    async fn test_other_handle_session_is_adopted() {
        let backend = MemoryStore::new();
        let a = store_over(backend.handle(), fingerprint());
        let b = store_over(backend, fingerprint());
        let mut events = b.subscribe();

        let created = a.create("0xabc", CreateOpts::default()).await.unwrap();

        match next_event(&mut events).await {
            SessionEvent::Adopted(session) => assert_eq!(session, created),
            other => panic!("expected adoption, got {:?}", other),
        }
        assert_eq!(b.current().await, Some(created));
    }

    #[tokio::test]
    async fn test_conflicting_wallet_is_surfaced_not_adopted() {
        let backend = MemoryStore::new();
        let a = store_over(backend.handle(), fingerprint());
        let b = store_over(backend, fingerprint());

        a.create("0xaaa", CreateOpts::default()).await.unwrap();
        let mut events = a.subscribe();
        b.create("0xbbb", CreateOpts::default()).await.unwrap();

        match next_event(&mut events).await {
            SessionEvent::ConflictDetected { current, incoming } => {
                assert_eq!(current.wallet_address, "0xaaa");
                assert_eq!(incoming.wallet_address, "0xbbb");
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        // The local session is untouched until the conflict is resolved.
        assert_eq!(a.current().await.unwrap().wallet_address, "0xaaa");

        let adopted = a.adopt_remote().await.unwrap();
        assert_eq!(adopted.wallet_address, "0xbbb");
        assert_eq!(a.current().await.unwrap().wallet_address, "0xbbb");
    }

    #[tokio::test]
    async fn test_clear_elsewhere_is_observed() {
        let backend = MemoryStore::new();
        let a = store_over(backend.handle(), fingerprint());
        let b = store_over(backend, fingerprint());

        a.create("0xabc", CreateOpts::default()).await.unwrap();
        b.restore().await.unwrap();
        let mut events = b.subscribe();

        a.clear().await.unwrap();

        match next_event(&mut events).await {
            SessionEvent::ClearedElsewhere => {}
            other => panic!("expected cleared event, got {:?}", other),
        }
        assert_eq!(b.current().await, None);
    }

    #[tokio::test]
    async fn test_own_writes_do_not_echo() {
        let store = store_over(MemoryStore::new(), fingerprint());
        let mut events = store.subscribe();

        store.create("0xabc", CreateOpts::default()).await.unwrap();
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_identical_remote_record_is_not_echoed() {
        let device = fingerprint();
        let session = Session::new(
            "0xabc",
            device.clone(),
            chrono::Duration::hours(1),
            CreateOpts::default(),
        );
        let current = Arc::new(RwLock::new(Some(session.clone())));
        let (events, mut rx) = broadcast::channel(4);

        // The same record this handle already holds arrives from another
        // writer, as after a restore of a record another handle created.
        let event = StoreEvent {
            writer: Uuid::new_v4(),
            key: SESSION_KEY.to_string(),
            value: Some(serde_json::to_string(&session).unwrap()),
        };
        apply_remote_event(event, Uuid::new_v4(), &device, &current, &events).await;

        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert_eq!(current.read().await.as_ref(), Some(&session));
    }
}
