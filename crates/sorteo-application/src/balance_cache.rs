//! Time-bounded balance cache with single-flight fetches.
//!
//! `BalanceCache` owns one [`Balance`] entry per address and every rule
//! about when an upstream call is allowed: a freshness window served
//! straight from cache, a stale-while-revalidate band that refreshes in
//! the background, a per-address throttle, capped retry with exponential
//! backoff, and a visibility gate that parks background refreshes while
//! the app is hidden. Concurrent lookups for one address collapse onto a
//! single upstream fetch.
//!
//! Ages are measured with `tokio::time::Instant`, so the whole policy is
//! testable under paused time.

use sorteo_core::backoff::Backoff;
use sorteo_core::balance::{Balance, BalanceSource};
use sorteo_core::config::EngineConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const WAITER_CHANNEL_CAPACITY: usize = 16;

/// Options for a cache lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Skip the freshness and throttle checks. A forced lookup still
    /// collapses onto a fetch already in flight.
    pub force: bool,
}

/// Per-address balance cache over an upstream [`BalanceSource`].
///
/// Cheap to clone; clones share one set of entries.
#[derive(Clone)]
pub struct BalanceCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    source: Arc<dyn BalanceSource>,
    cache_timeout: Duration,
    background_threshold: Duration,
    throttle_window: Duration,
    backoff: Backoff,
    entries: Mutex<HashMap<String, AddressState>>,
    visible: watch::Sender<bool>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// Cached entry plus fetch bookkeeping for one address.
#[derive(Default)]
struct AddressState {
    entry: Option<CacheEntry>,
    /// Completion channel of the fetch currently in flight.
    in_flight: Option<broadcast::Sender<Balance>>,
    /// Most recent fetch start or completion, for throttling.
    last_fetch: Option<Instant>,
    /// Bumped by `clear`; a completion carrying an older generation is
    /// discarded instead of landing in the cache.
    generation: u64,
}

#[derive(Clone)]
struct CacheEntry {
    balance: Balance,
    settled_at: Instant,
}

/// Authorization for one upstream fetch, minted under the state lock.
struct FetchTicket {
    address: String,
    generation: u64,
    tx: broadcast::Sender<Balance>,
}

/// What a lookup decided to do, chosen in one pass under the state lock.
enum Plan {
    /// Serve this value with no upstream call.
    Serve(Balance),
    /// Serve this value and refresh behind it.
    Revalidate(Balance, FetchTicket),
    /// Wait on the fetch already in flight.
    Join(broadcast::Receiver<Balance>),
    /// Run the fetch and wait for it.
    Lead(FetchTicket),
}

impl AddressState {
    fn throttled(&self, now: Instant, window: Duration) -> bool {
        self.last_fetch
            .is_some_and(|at| now.duration_since(at) < window)
    }

    /// Marks a fetch as started and mints its completion ticket.
    fn begin_fetch(&mut self, address: String, now: Instant) -> FetchTicket {
        let (tx, _) = broadcast::channel(WAITER_CHANNEL_CAPACITY);
        self.in_flight = Some(tx.clone());
        self.last_fetch = Some(now);
        FetchTicket {
            address,
            generation: self.generation,
            tx,
        }
    }

    /// Forgets everything about this address. The state object itself
    /// stays in the map so the generation bump outlives a doomed fetch.
    fn reset(&mut self) {
        self.entry = None;
        self.in_flight = None;
        self.last_fetch = None;
        self.generation += 1;
    }
}

impl BalanceCache {
    /// Creates a cache over `source` with the configured timings.
    pub fn new(source: Arc<dyn BalanceSource>, config: &EngineConfig) -> Self {
        let (visible, _) = watch::channel(true);
        Self {
            inner: Arc::new(CacheInner {
                source,
                cache_timeout: config.cache_timeout(),
                background_threshold: config.background_refresh_threshold(),
                throttle_window: config.throttle_window(),
                backoff: Backoff::new(config.retry_base_delay(), config.max_retry_attempts),
                entries: Mutex::new(HashMap::new()),
                visible,
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Looks up the balance for `address`, going upstream only when the
    /// cached entry is missing, expired, or error-marked.
    pub async fn get(&self, address: &str) -> Balance {
        self.get_with(address, GetOptions::default()).await
    }

    /// Lookup with explicit options.
    pub async fn get_with(&self, address: &str, opts: GetOptions) -> Balance {
        match self.inner.plan(address, opts) {
            Plan::Serve(balance) => balance,
            Plan::Revalidate(balance, ticket) => {
                self.spawn_fetch(ticket);
                balance
            }
            Plan::Join(rx) => self.await_result(address, rx).await,
            Plan::Lead(ticket) => {
                let rx = ticket.tx.subscribe();
                self.spawn_fetch(ticket);
                self.await_result(address, rx).await
            }
        }
    }

    /// The cached balance for `address`, never triggering a fetch.
    pub fn snapshot(&self, address: &str) -> Option<Balance> {
        let entries = self.inner.entries.lock().unwrap();
        entries
            .get(address)
            .and_then(|state| state.entry.as_ref())
            .map(|entry| entry.balance.clone())
    }

    /// Drops the entry for `address`.
    ///
    /// A fetch in flight keeps running for its waiters, but its result
    /// can no longer land in the cache.
    pub fn clear(&self, address: &str) {
        let mut entries = self.inner.entries.lock().unwrap();
        if let Some(state) = entries.get_mut(address) {
            state.reset();
        }
    }

    /// Drops every entry.
    pub fn clear_all(&self) {
        let mut entries = self.inner.entries.lock().unwrap();
        for state in entries.values_mut() {
            state.reset();
        }
    }

    /// Updates the visibility gate.
    ///
    /// While hidden, stale entries are served without background
    /// refreshes. Becoming visible re-checks every stale entry at once.
    pub fn set_visible(&self, visible: bool) {
        let was = *self.inner.visible.borrow();
        self.inner.visible.send_replace(visible);
        if visible && !was {
            self.refresh_stale();
        }
    }

    pub fn is_visible(&self) -> bool {
        *self.inner.visible.borrow()
    }

    /// Watches the visibility gate.
    pub fn visibility(&self) -> watch::Receiver<bool> {
        self.inner.visible.subscribe()
    }

    /// Cancels in-flight fetches and waits for their tasks to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    /// Starts a refresh for every entry past the background threshold,
    /// skipping addresses with a fetch in flight or inside the throttle
    /// window.
    fn refresh_stale(&self) {
        let now = Instant::now();
        let mut tickets = Vec::new();
        {
            let mut entries = self.inner.entries.lock().unwrap();
            for (address, state) in entries.iter_mut() {
                if state.in_flight.is_some() || state.throttled(now, self.inner.throttle_window) {
                    continue;
                }
                let stale = state.entry.as_ref().is_some_and(|entry| {
                    now.duration_since(entry.settled_at) > self.inner.background_threshold
                });
                if stale {
                    tickets.push(state.begin_fetch(address.clone(), now));
                }
            }
        }
        for ticket in tickets {
            tracing::debug!(address = %ticket.address, "refreshing stale balance");
            self.spawn_fetch(ticket);
        }
    }

    fn spawn_fetch(&self, ticket: FetchTicket) {
        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move {
            let outcome = tokio::select! {
                _ = inner.cancel.cancelled() => {
                    // Closes the waiter channel; recv errors and waiters
                    // fall back to the snapshot.
                    inner.abandon(&ticket);
                    return;
                }
                outcome = inner.fetch_with_retry(&ticket.address) => outcome,
            };
            inner.complete(ticket, outcome);
        });
    }

    async fn await_result(&self, address: &str, mut rx: broadcast::Receiver<Balance>) -> Balance {
        match rx.recv().await {
            Ok(balance) => balance,
            // The fetch was torn down before completing (shutdown).
            Err(_) => self.snapshot(address).unwrap_or_else(Balance::loading),
        }
    }
}

impl CacheInner {
    /// Decides what a lookup does. All cache policy lives here, in one
    /// pass under the state lock, with no await points.
    fn plan(&self, address: &str, opts: GetOptions) -> Plan {
        let now = Instant::now();
        let visible = *self.visible.borrow();
        let mut entries = self.entries.lock().unwrap();
        let state = entries.entry(address.to_string()).or_default();

        // Everyone collapses onto a fetch in flight, force included.
        if let Some(tx) = &state.in_flight {
            tracing::debug!(%address, "joining in-flight balance fetch");
            return Plan::Join(tx.subscribe());
        }

        if let Some(entry) = &state.entry {
            let age = now.duration_since(entry.settled_at);
            let balance = entry.balance.clone();
            let usable = age <= self.cache_timeout && balance.error.is_none();

            if usable && !opts.force {
                let revalidate = age > self.background_threshold
                    && visible
                    && !state.throttled(now, self.throttle_window);
                if revalidate {
                    tracing::debug!(%address, age_ms = age.as_millis() as u64, "serving cached balance, revalidating");
                    let ticket = state.begin_fetch(address.to_string(), now);
                    return Plan::Revalidate(balance, ticket);
                }
                return Plan::Serve(balance);
            }

            // Expired, error-marked, or forced. Inside the throttle
            // window the cached value is served as is; only force goes
            // upstream regardless.
            if state.throttled(now, self.throttle_window) && !opts.force {
                tracing::debug!(%address, "throttled, serving cached balance");
                return Plan::Serve(balance);
            }
        }

        let ticket = state.begin_fetch(address.to_string(), now);
        Plan::Lead(ticket)
    }

    /// Upstream fetch with capped exponential retries.
    ///
    /// Backoff sleeps race the cancellation token so shutdown never waits
    /// out a retry schedule.
    async fn fetch_with_retry(&self, address: &str) -> sorteo_core::Result<f64> {
        let mut attempt = 0u32;
        loop {
            match self.source.fetch_balance(address).await {
                Ok(quote) => return Ok(quote.amount),
                Err(err) => {
                    let Some(delay) = self.backoff.delay(attempt) else {
                        tracing::warn!(%address, attempts = attempt + 1, "balance fetch retries exhausted: {}", err);
                        return Err(err);
                    };
                    tracing::debug!(%address, attempt, delay_ms = delay.as_millis() as u64, "retrying balance fetch");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(err),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Releases the in-flight slot of a fetch that will never complete.
    fn abandon(&self, ticket: &FetchTicket) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(state) = entries.get_mut(&ticket.address) {
            if state.generation == ticket.generation {
                state.in_flight = None;
            }
        }
    }

    /// Lands a fetch outcome: updates the entry, unless a clear
    /// superseded the fetch, and wakes every waiter either way.
    fn complete(&self, ticket: FetchTicket, outcome: sorteo_core::Result<f64>) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let state = entries.entry(ticket.address.clone()).or_default();

        let balance = match outcome {
            Ok(amount) => Balance::settled(amount),
            Err(err) => {
                // Keep the last known amount; only the error marker moves.
                let mut carried = state
                    .entry
                    .as_ref()
                    .map(|entry| entry.balance.clone())
                    .unwrap_or_else(Balance::loading);
                carried.is_loading = false;
                carried.error = Some(err.to_string());
                carried
            }
        };

        if state.generation == ticket.generation {
            state.entry = Some(CacheEntry {
                balance: balance.clone(),
                settled_at: now,
            });
            state.in_flight = None;
            state.last_fetch = Some(now);
        } else {
            tracing::debug!(address = %ticket.address, "dropping superseded balance fetch");
        }
        drop(entries);

        // Waiters asked before any clear, so they get the result.
        let _ = ticket.tx.send(balance);
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sorteo_core::balance::BalanceQuote;
    use sorteo_core::{Result, WalletError};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::advance;

    const ADDRESS: &str = "0x4b2c";

    /// Balance source with a scripted outcome queue and call counting.
    struct ScriptedSource {
        calls: AtomicU32,
        script: Mutex<VecDeque<Result<f64>>>,
        fallback: f64,
        delay: Option<Duration>,
    }

    impl ScriptedSource {
        fn new(fallback: f64) -> Self {
            Self {
                calls: AtomicU32::new(0),
                script: Mutex::new(VecDeque::new()),
                fallback,
                delay: None,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn push(&self, outcome: Result<f64>) {
            self.script.lock().unwrap().push_back(outcome);
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BalanceSource for ScriptedSource {
        async fn fetch_balance(&self, _address: &str) -> Result<BalanceQuote> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(amount)) => Ok(BalanceQuote { amount }),
                Some(Err(err)) => Err(err),
                None => Ok(BalanceQuote {
                    amount: self.fallback,
                }),
            }
        }
    }

    fn cache_over(source: Arc<ScriptedSource>) -> BalanceCache {
        BalanceCache::new(source, &EngineConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_served_without_upstream_call() {
        let source = Arc::new(ScriptedSource::new(100.0));
        let cache = cache_over(Arc::clone(&source));

        let first = cache.get(ADDRESS).await;
        assert_eq!(first.amount, 100.0);
        assert_eq!(first.formatted, "100.00 WLD");
        assert!(!first.is_loading);

        advance(Duration::from_secs(5)).await;
        let again = cache.get(ADDRESS).await;
        assert_eq!(again.amount, 100.0);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_served_then_revalidated() {
        let source = Arc::new(ScriptedSource::new(0.0));
        source.push(Ok(100.0));
        source.push(Ok(150.0));
        let cache = cache_over(Arc::clone(&source));

        assert_eq!(cache.get(ADDRESS).await.amount, 100.0);

        // Past the background threshold but inside the cache timeout:
        // the stale value comes back immediately, one refresh runs
        // behind it.
        advance(Duration::from_secs(15)).await;
        assert_eq!(cache.get(ADDRESS).await.amount, 100.0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.calls(), 2);
        assert_eq!(cache.snapshot(ADDRESS).unwrap().amount, 150.0);

        // The refreshed entry is fresh again.
        assert_eq!(cache.get(ADDRESS).await.amount, 150.0);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_blocks_on_fresh_fetch() {
        let source = Arc::new(ScriptedSource::new(0.0));
        source.push(Ok(100.0));
        source.push(Ok(175.0));
        let cache = cache_over(Arc::clone(&source));

        assert_eq!(cache.get(ADDRESS).await.amount, 100.0);

        advance(Duration::from_secs(35)).await;
        let fresh = cache.get(ADDRESS).await;
        assert_eq!(fresh.amount, 175.0);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_bypasses_freshness_and_throttle() {
        let source = Arc::new(ScriptedSource::new(0.0));
        source.push(Ok(100.0));
        source.push(Ok(120.0));
        let cache = cache_over(Arc::clone(&source));

        assert_eq!(cache.get(ADDRESS).await.amount, 100.0);

        let forced = cache.get_with(ADDRESS, GetOptions { force: true }).await;
        assert_eq!(forced.amount, 120.0);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_gets_collapse_to_one_fetch() {
        let source = Arc::new(ScriptedSource::new(42.0).with_delay(Duration::from_millis(200)));
        let cache = cache_over(Arc::clone(&source));

        let (a, b, c) = tokio::join!(cache.get(ADDRESS), cache.get(ADDRESS), cache.get(ADDRESS));

        assert_eq!(source.calls(), 1);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.amount, 42.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_get_joins_fetch_in_flight() {
        let source = Arc::new(ScriptedSource::new(7.0).with_delay(Duration::from_millis(100)));
        let cache = cache_over(Arc::clone(&source));

        let (plain, forced) = tokio::join!(
            cache.get(ADDRESS),
            cache.get_with(ADDRESS, GetOptions { force: true })
        );

        assert_eq!(source.calls(), 1);
        assert_eq!(plain.amount, 7.0);
        assert_eq!(forced.amount, 7.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_spends_initial_plus_retries() {
        let source = Arc::new(ScriptedSource::new(0.0));
        for _ in 0..8 {
            source.push(Err(WalletError::network("balance api down")));
        }
        let cache = cache_over(Arc::clone(&source));

        let balance = cache.get(ADDRESS).await;

        assert_eq!(source.calls(), 4);
        assert!(balance.error.is_some());
        assert!(!balance.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_last_known_amount() {
        let source = Arc::new(ScriptedSource::new(0.0));
        source.push(Ok(100.0));
        for _ in 0..4 {
            source.push(Err(WalletError::network("balance api down")));
        }
        let cache = cache_over(Arc::clone(&source));

        assert_eq!(cache.get(ADDRESS).await.amount, 100.0);

        advance(Duration::from_secs(31)).await;
        let degraded = cache.get(ADDRESS).await;
        assert!(degraded.error.is_some());
        assert_eq!(degraded.amount, 100.0);
        assert_eq!(degraded.formatted, "100.00 WLD");
        assert_eq!(source.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_entry_throttles_then_refetches() {
        let source = Arc::new(ScriptedSource::new(55.0));
        for _ in 0..4 {
            source.push(Err(WalletError::network("balance api down")));
        }
        let cache = cache_over(Arc::clone(&source));

        assert!(cache.get(ADDRESS).await.error.is_some());
        assert_eq!(source.calls(), 4);

        // Inside the throttle window the error-marked entry is served.
        assert!(cache.get(ADDRESS).await.error.is_some());
        assert_eq!(source.calls(), 4);

        // Past the window the next lookup goes upstream again.
        advance(Duration::from_millis(1100)).await;
        let recovered = cache.get(ADDRESS).await;
        assert!(recovered.error.is_none());
        assert_eq!(recovered.amount, 55.0);
        assert_eq!(source.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_forces_next_fetch() {
        let source = Arc::new(ScriptedSource::new(0.0));
        source.push(Ok(10.0));
        source.push(Ok(20.0));
        let cache = cache_over(Arc::clone(&source));

        assert_eq!(cache.get(ADDRESS).await.amount, 10.0);

        cache.clear(ADDRESS);
        assert_eq!(cache.snapshot(ADDRESS), None);

        assert_eq!(cache.get(ADDRESS).await.amount, 20.0);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_flight_never_lands() {
        let source = Arc::new(ScriptedSource::new(99.0).with_delay(Duration::from_millis(200)));
        let cache = cache_over(Arc::clone(&source));

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get(ADDRESS).await })
        };
        // Let the fetch start, then drop the address mid-flight.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.clear(ADDRESS);

        // The waiter still gets its value, but the cache never adopts it.
        let delivered = pending.await.unwrap();
        assert_eq!(delivered.amount, 99.0);
        assert_eq!(cache.snapshot(ADDRESS), None);

        // The next lookup starts from scratch.
        assert_eq!(cache.get(ADDRESS).await.amount, 99.0);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_suppresses_background_refresh() {
        let source = Arc::new(ScriptedSource::new(0.0));
        source.push(Ok(100.0));
        source.push(Ok(130.0));
        let cache = cache_over(Arc::clone(&source));

        cache.get(ADDRESS).await;
        cache.set_visible(false);

        // Stale but hidden: serve the cached value, schedule nothing.
        advance(Duration::from_secs(15)).await;
        assert_eq!(cache.get(ADDRESS).await.amount, 100.0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.calls(), 1);

        // Becoming visible refreshes the stale entry immediately.
        cache.set_visible(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.calls(), 2);
        assert_eq!(cache.snapshot(ADDRESS).unwrap().amount, 130.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_never_fetches() {
        let source = Arc::new(ScriptedSource::new(1.0));
        let cache = cache_over(Arc::clone(&source));

        assert_eq!(cache.snapshot(ADDRESS), None);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_tears_down_fetch_in_flight() {
        let source = Arc::new(ScriptedSource::new(5.0).with_delay(Duration::from_secs(10)));
        let cache = cache_over(Arc::clone(&source));

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get(ADDRESS).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.shutdown().await;

        // The waiter is released with a placeholder, nothing landed.
        let delivered = pending.await.unwrap();
        assert!(delivered.is_loading);
        assert_eq!(cache.snapshot(ADDRESS), None);
    }
}
