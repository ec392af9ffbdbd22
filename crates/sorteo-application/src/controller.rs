//! Connection lifecycle controller.
//!
//! `ConnectionController` is the engine's front door: it drives the
//! connect, disconnect, and refresh flows over the provider and auth
//! ports, owns the externally visible [`ConnectionStatus`], and wires the
//! session store and balance cache together. Concurrent connect calls
//! collapse onto one attempt, and a disconnect supersedes whatever was in
//! flight through an epoch counter rather than by killing tasks.
//!
//! Three background loops run for the controller's lifetime: one follows
//! cross-handle session events into local state, one evicts the session
//! once its hard expiry passes, and one keeps the connected wallet's
//! balance warm while the app is visible.

use crate::balance_cache::BalanceCache;
use crate::session_store::{SessionEvent, SessionStore};
use chrono::{DateTime, Utc};
use sorteo_core::auth::{AuthApi, LoginPayload};
use sorteo_core::backoff::Backoff;
use sorteo_core::config::EngineConfig;
use sorteo_core::provider::{AuthRequest, AuthResponse, WalletProvider};
use sorteo_core::session::CreateOpts;
use sorteo_core::{ErrorReport, Result, SessionInvalidReason, WalletError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Statement the wallet app displays while asking the user to sign.
const AUTH_STATEMENT: &str = "Sign in to Sorteo with your wallet";

const CONNECT_WAITERS: usize = 8;

/// Externally visible connection state.
///
/// `Error` carries the report of the failure that put the controller
/// there; recovery is an explicit user action (retry, adopt, disconnect).
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error(ErrorReport),
}

/// An established wallet connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub address: String,
    pub connected_at: DateTime<Utc>,
    pub last_refresh_at: Option<DateTime<Utc>>,
}

type ConnectOutcome = std::result::Result<Connection, ErrorReport>;

/// Drives the wallet connection lifecycle.
///
/// Construct inside a Tokio runtime; the background loops are spawned
/// immediately and stopped by [`ConnectionController::shutdown`].
pub struct ConnectionController {
    inner: Arc<Inner>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

struct Inner {
    provider: Arc<dyn WalletProvider>,
    auth: Arc<dyn AuthApi>,
    sessions: Arc<SessionStore>,
    balances: BalanceCache,
    connect_backoff: Backoff,
    auto_refresh_interval: Duration,
    expiry_check_interval: Duration,
    status: watch::Sender<ConnectionStatus>,
    connection: std::sync::RwLock<Option<Connection>>,
    /// Completion channel of the connect currently in flight.
    connect_flight: Mutex<Option<broadcast::Sender<ConnectOutcome>>>,
    /// Bumped by every disconnect. An operation captures the value at its
    /// start and must not publish results once it moved on.
    epoch: AtomicU64,
    last_error: std::sync::RwLock<Option<ErrorReport>>,
    cancel: CancellationToken,
}

impl ConnectionController {
    /// Creates the controller over its ports and spawns the background
    /// loops.
    pub fn new(
        provider: Arc<dyn WalletProvider>,
        auth: Arc<dyn AuthApi>,
        sessions: Arc<SessionStore>,
        balances: BalanceCache,
        config: &EngineConfig,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let inner = Arc::new(Inner {
            provider,
            auth,
            sessions,
            balances,
            // `connect_max_attempts` counts the initial try.
            connect_backoff: Backoff::new(
                config.connect_retry_base(),
                config.connect_max_attempts.saturating_sub(1),
            ),
            auto_refresh_interval: config.auto_refresh_interval(),
            expiry_check_interval: config.expiry_check_interval(),
            status,
            connection: std::sync::RwLock::new(None),
            connect_flight: Mutex::new(None),
            epoch: AtomicU64::new(0),
            last_error: std::sync::RwLock::new(None),
            cancel: CancellationToken::new(),
        });

        // Subscribe before spawning so events published between
        // construction and the loop's first poll are not dropped.
        let session_events = inner.sessions.subscribe();
        let tasks = vec![
            tokio::spawn(session_event_loop(Arc::clone(&inner), session_events)),
            tokio::spawn(expiry_watchdog(Arc::clone(&inner))),
            tokio::spawn(auto_refresh_loop(Arc::clone(&inner))),
        ];

        Self {
            inner,
            tasks: std::sync::Mutex::new(tasks),
        }
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    /// Watches status transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// The established connection, if any.
    pub fn connection(&self) -> Option<Connection> {
        self.inner.connection.read().unwrap().clone()
    }

    /// The most recent connect or session failure, for recovery surfaces.
    pub fn last_error(&self) -> Option<ErrorReport> {
        self.inner.last_error.read().unwrap().clone()
    }

    /// The balance cache wired to this controller.
    pub fn balances(&self) -> &BalanceCache {
        &self.inner.balances
    }

    /// The session store wired to this controller.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.inner.sessions
    }

    /// Restores a persisted session on startup.
    ///
    /// A valid record with auto-connect set resumes the connection without
    /// touching the provider. A valid record without it stays loaded for
    /// an explicit connect. An invalid record was purged by the store; its
    /// rejection reason lands in [`ConnectionController::last_error`].
    pub async fn initialize(&self) -> Result<Option<Connection>> {
        use crate::session_store::RestoreOutcome;

        match self.inner.sessions.restore().await? {
            RestoreOutcome::Restored(session) if session.auto_connect => {
                let connection = Connection {
                    address: session.wallet_address.clone(),
                    connected_at: session.created_at,
                    last_refresh_at: Some(session.last_accessed_at),
                };
                *self.inner.connection.write().unwrap() = Some(connection.clone());
                self.inner.set_status(ConnectionStatus::Connected);
                tracing::info!(address = %connection.address, "session resumed");
                Ok(Some(connection))
            }
            RestoreOutcome::Restored(_) => Ok(None),
            RestoreOutcome::Empty => Ok(None),
            RestoreOutcome::Purged(reason) => {
                tracing::info!(%reason, "stored session rejected on startup");
                let report = ErrorReport::from(WalletError::SessionInvalid(reason));
                *self.inner.last_error.write().unwrap() = Some(report);
                Ok(None)
            }
        }
    }

    /// Connects the wallet: availability check, nonce authentication,
    /// backend login, session creation.
    ///
    /// Already connected is a no-op returning the existing connection.
    /// Concurrent calls collapse onto the attempt in flight and share its
    /// outcome. Transient network failures retry on the connect backoff
    /// schedule; rejections and user cancellation do not.
    pub async fn connect(&self) -> ConnectOutcome {
        if let Some(existing) = self.connection() {
            tracing::debug!(address = %existing.address, "connect while already connected");
            return Ok(existing);
        }

        let mut rx = {
            let mut flight = self.inner.connect_flight.lock().await;
            match flight.as_ref() {
                Some(tx) => {
                    tracing::debug!("joining connect in flight");
                    tx.subscribe()
                }
                None => {
                    let (tx, rx) = broadcast::channel(CONNECT_WAITERS);
                    *flight = Some(tx.clone());
                    // The attempt runs detached so a caller dropping its
                    // future cannot strand the other waiters.
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        let epoch = inner.epoch.load(Ordering::SeqCst);
                        inner.set_status(ConnectionStatus::Connecting);
                        let outcome = inner.run_connect(epoch).await;
                        *inner.connect_flight.lock().await = None;
                        inner.publish_connect_outcome(epoch, &outcome);
                        let _ = tx.send(outcome);
                    });
                    rx
                }
            }
        };

        match rx.recv().await {
            Ok(outcome) => outcome,
            Err(_) => Err(ErrorReport::cancelled()),
        }
    }

    /// Disconnects: tears down the session, clears cached balances, and
    /// supersedes any connect still in flight.
    ///
    /// The backend logout is best effort; a failure is logged and the
    /// local teardown proceeds.
    pub async fn disconnect(&self) -> Result<()> {
        // Bump first so an in-flight connect observes the disconnect
        // before its result can land.
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);

        if let Err(err) = self.inner.auth.logout().await {
            tracing::warn!("backend logout failed: {}", err);
        }
        self.inner.sessions.clear().await?;
        *self.inner.connection.write().unwrap() = None;
        *self.inner.last_error.write().unwrap() = None;
        self.inner.balances.clear_all();
        self.inner.set_status(ConnectionStatus::Disconnected);
        tracing::info!("wallet disconnected");
        Ok(())
    }

    /// Confirms the provider still reports the connected identity and
    /// extends the session lifetime.
    ///
    /// A wallet-side sign-out observed here is an external disconnect:
    /// the connection is torn down and the status lands in
    /// `Disconnected`, with the report kept in
    /// [`ConnectionController::last_error`] for messaging. An identity
    /// change stays an error surface until the user decides.
    pub async fn refresh(&self) -> ConnectOutcome {
        let Some(connection) = self.connection() else {
            return Err(ErrorReport::not_connected());
        };

        match self.inner.provider.current_identity().await {
            Some(identity) if identity.address == connection.address => {}
            Some(identity) => {
                tracing::warn!(
                    held = %connection.address,
                    reported = %identity.address,
                    "wallet identity changed externally"
                );
                let report =
                    ErrorReport::from(WalletError::auth_failed("wallet identity changed externally"));
                self.teardown_stale(&report).await;
                self.inner.set_status(ConnectionStatus::Error(report.clone()));
                return Err(report);
            }
            None => {
                tracing::warn!("wallet signed out externally");
                let report = ErrorReport::signed_out();
                self.teardown_stale(&report).await;
                self.inner.set_status(ConnectionStatus::Disconnected);
                return Err(report);
            }
        }

        let session = self
            .inner
            .sessions
            .refresh()
            .await
            .map_err(ErrorReport::from)?
            .ok_or_else(ErrorReport::not_connected)?;

        let refreshed = Connection {
            address: connection.address,
            connected_at: connection.connected_at,
            last_refresh_at: Some(session.last_accessed_at),
        };
        *self.inner.connection.write().unwrap() = Some(refreshed.clone());
        tracing::debug!(address = %refreshed.address, "connection refreshed");
        Ok(refreshed)
    }

    /// Resolves a cross-handle conflict by adopting the other handle's
    /// session as the local connection.
    pub async fn adopt_remote(&self) -> Result<Connection> {
        let session = self.inner.sessions.adopt_remote().await?;
        let connection = Connection {
            address: session.wallet_address.clone(),
            connected_at: session.created_at,
            last_refresh_at: Some(session.last_accessed_at),
        };
        *self.inner.connection.write().unwrap() = Some(connection.clone());
        *self.inner.last_error.write().unwrap() = None;
        // The adopted identity may differ, so cached balances are stale.
        self.inner.balances.clear_all();
        self.inner.set_status(ConnectionStatus::Connected);
        tracing::info!(address = %connection.address, "adopted session from another handle");
        Ok(connection)
    }

    /// Stops the background loops and tears down the session listener and
    /// balance fetches.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            let _ = task.await;
        }
        self.inner.sessions.shutdown().await;
        self.inner.balances.shutdown().await;
    }

    /// Clears connection state after the wallet-side identity went away.
    ///
    /// The caller sets the resulting status; sign-out and identity change
    /// land differently.
    async fn teardown_stale(&self, report: &ErrorReport) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.inner.sessions.clear().await {
            tracing::warn!("failed to clear stale session: {}", err);
        }
        *self.inner.connection.write().unwrap() = None;
        self.inner.balances.clear_all();
        *self.inner.last_error.write().unwrap() = Some(report.clone());
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl Inner {
    fn set_status(&self, next: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            tracing::debug!(status = ?next, "connection status changed");
            *current = next;
            true
        });
    }

    fn superseded(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != epoch
    }

    /// Publishes a finished connect, unless a disconnect superseded it
    /// and already owns the visible state.
    fn publish_connect_outcome(&self, epoch: u64, outcome: &ConnectOutcome) {
        if self.superseded(epoch) {
            return;
        }
        match outcome {
            Ok(connection) => {
                *self.connection.write().unwrap() = Some(connection.clone());
                *self.last_error.write().unwrap() = None;
                self.set_status(ConnectionStatus::Connected);
            }
            Err(report) => {
                *self.last_error.write().unwrap() = Some(report.clone());
                self.set_status(ConnectionStatus::Error(report.clone()));
            }
        }
    }

    async fn run_connect(&self, epoch: u64) -> ConnectOutcome {
        if !self.provider.is_available().await {
            tracing::warn!("wallet provider unavailable");
            return Err(ErrorReport::from(WalletError::ProviderUnavailable));
        }

        let response = self.authenticate_with_retry(epoch).await?;
        if self.superseded(epoch) {
            return Err(ErrorReport::cancelled());
        }

        // The provider may know more than the signature proves, e.g. the
        // simulated persona id.
        let mock_user_id = self
            .provider
            .current_identity()
            .await
            .and_then(|identity| identity.persona_id);

        let session = self
            .sessions
            .create(
                &response.address,
                CreateOpts {
                    auto_connect: true,
                    mock_user_id,
                },
            )
            .await
            .map_err(ErrorReport::from)?;

        if self.superseded(epoch) {
            // A disconnect raced the tail of this connect; take the
            // session back out.
            if let Err(err) = self.sessions.clear().await {
                tracing::warn!("failed to roll back superseded session: {}", err);
            }
            return Err(ErrorReport::cancelled());
        }

        tracing::info!(address = %session.wallet_address, "wallet connected");
        Ok(Connection {
            address: session.wallet_address,
            connected_at: session.created_at,
            last_refresh_at: None,
        })
    }

    async fn authenticate_with_retry(
        &self,
        epoch: u64,
    ) -> std::result::Result<AuthResponse, ErrorReport> {
        let mut attempt = 0u32;
        loop {
            if self.superseded(epoch) {
                return Err(ErrorReport::cancelled());
            }
            match self.authenticate_once().await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_network() => {
                    let Some(delay) = self.connect_backoff.delay(attempt) else {
                        tracing::warn!(attempts = attempt + 1, "connect retries exhausted: {}", err);
                        return Err(ErrorReport::from(err));
                    };
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying connect");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(ErrorReport::cancelled()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_cancelled() {
                        tracing::info!("authentication cancelled by user");
                    }
                    return Err(ErrorReport::from(err));
                }
            }
        }
    }

    /// One full authentication round trip: nonce, wallet signature,
    /// backend verification.
    async fn authenticate_once(&self) -> Result<AuthResponse> {
        let nonce = self.auth.fetch_nonce().await?;
        let response = self
            .provider
            .authenticate(AuthRequest::new(nonce, AUTH_STATEMENT))
            .await?;
        self.auth
            .complete_login(&LoginPayload::from(&response))
            .await?;
        Ok(response)
    }
}

/// Follows cross-handle session events into controller state.
async fn session_event_loop(inner: Arc<Inner>, mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        let event = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "controller lagged on session events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        match event {
            SessionEvent::Adopted(session) => {
                let connection = Connection {
                    address: session.wallet_address.clone(),
                    connected_at: session.created_at,
                    last_refresh_at: Some(session.last_accessed_at),
                };
                *inner.connection.write().unwrap() = Some(connection);
                *inner.last_error.write().unwrap() = None;
                inner.set_status(ConnectionStatus::Connected);
                tracing::info!(address = %session.wallet_address, "following session from another handle");
            }
            SessionEvent::ConflictDetected { current, incoming } => {
                let report = ErrorReport::session_conflict(
                    &current.wallet_address,
                    &incoming.wallet_address,
                );
                *inner.last_error.write().unwrap() = Some(report.clone());
                inner.set_status(ConnectionStatus::Error(report));
            }
            SessionEvent::ClearedElsewhere => {
                *inner.connection.write().unwrap() = None;
                inner.balances.clear_all();
                inner.set_status(ConnectionStatus::Disconnected);
                tracing::info!("disconnected by another handle");
            }
        }
    }
}

/// Evicts the session once its hard expiry passes.
///
/// The store refuses expired records on restore; this loop covers the
/// long-running process whose session lapses in place.
async fn expiry_watchdog(inner: Arc<Inner>) {
    let start = tokio::time::Instant::now() + inner.expiry_check_interval;
    let mut ticker = tokio::time::interval_at(start, inner.expiry_check_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let expired = inner
            .sessions
            .current()
            .await
            .is_some_and(|session| session.is_expired_at(Utc::now()));
        if !expired {
            continue;
        }

        tracing::info!("session expired, disconnecting");
        inner.epoch.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = inner.sessions.clear().await {
            tracing::warn!("failed to clear expired session: {}", err);
        }
        *inner.connection.write().unwrap() = None;
        inner.balances.clear_all();
        let report = ErrorReport::from(WalletError::SessionInvalid(SessionInvalidReason::Expired));
        *inner.last_error.write().unwrap() = Some(report);
        inner.set_status(ConnectionStatus::Disconnected);
    }
}

/// Keeps the connected wallet's balance warm while the app is visible.
///
/// Each pass goes through the cache, so the freshness, throttle, and
/// single-flight rules still apply.
async fn auto_refresh_loop(inner: Arc<Inner>) {
    let start = tokio::time::Instant::now() + inner.auto_refresh_interval;
    let mut ticker = tokio::time::interval_at(start, inner.auto_refresh_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !inner.balances.is_visible() {
            continue;
        }
        if !matches!(&*inner.status.borrow(), ConnectionStatus::Connected) {
            continue;
        }
        let address = inner
            .connection
            .read()
            .unwrap()
            .as_ref()
            .map(|connection| connection.address.clone());
        if let Some(address) = address {
            inner.balances.get(&address).await;
        }
    }
}
