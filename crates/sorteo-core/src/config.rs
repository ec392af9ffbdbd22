//! Engine configuration.
//!
//! Consumed, not owned, by the engine: a provider-selection flag, an
//! artificial-delay flag for simulated mode, and numeric overrides for the
//! cache, throttle, and retry timings. Loading and environment overrides
//! live in the infrastructure layer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunable knobs for the wallet engine.
///
/// All timings are milliseconds unless the field name says otherwise.
/// Wall-clock durations (session TTL, activity refresh) are exposed as
/// `chrono::Duration`, monotonic ones as `std::time::Duration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Use the simulated wallet provider instead of the bridge.
    pub simulate_provider: bool,
    /// Add artificial latency to simulated provider calls.
    pub simulate_delay: bool,

    /// Cache entries younger than this are served without an upstream call.
    pub cache_timeout_ms: u64,
    /// Entries older than this (but still fresh) refresh in the background.
    pub background_refresh_ms: u64,
    /// Minimum spacing between effective refreshes per address.
    pub throttle_window_ms: u64,
    /// Base delay of the balance fetch retry schedule.
    pub retry_base_delay_ms: u64,
    /// Retry cap for balance fetches.
    pub max_retry_attempts: u32,

    /// Base delay of the connect retry schedule (transient failures only).
    pub connect_retry_base_ms: u64,
    /// Attempt cap for connect (initial try plus retries).
    pub connect_max_attempts: u32,

    /// Session lifetime from creation or last activity refresh.
    pub session_ttl_secs: u64,
    /// Activity bumps the session at most once per this interval.
    pub activity_refresh_min_secs: u64,
    /// Spacing of the balance auto-refresh loop.
    pub auto_refresh_interval_ms: u64,
    /// Spacing of the session expiry watchdog.
    pub expiry_check_interval_ms: u64,

    /// Base URL of the backend auth API.
    pub auth_base_url: String,
    /// URL of the host wallet app's local bridge.
    pub bridge_url: String,
    /// URL of the external balance API.
    pub balance_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            simulate_provider: false,
            simulate_delay: false,
            cache_timeout_ms: 30_000,
            background_refresh_ms: 10_000,
            throttle_window_ms: 1_000,
            retry_base_delay_ms: 500,
            max_retry_attempts: 3,
            connect_retry_base_ms: 400,
            connect_max_attempts: 3,
            session_ttl_secs: 86_400,
            activity_refresh_min_secs: 60,
            auto_refresh_interval_ms: 30_000,
            expiry_check_interval_ms: 60_000,
            auth_base_url: "http://localhost:8787/api".to_string(),
            bridge_url: "http://127.0.0.1:7121".to_string(),
            balance_url: "http://localhost:8787/api/balance".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }

    pub fn background_refresh_threshold(&self) -> Duration {
        Duration::from_millis(self.background_refresh_ms)
    }

    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn connect_retry_base(&self) -> Duration {
        Duration::from_millis(self.connect_retry_base_ms)
    }

    pub fn auto_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.auto_refresh_interval_ms)
    }

    pub fn expiry_check_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_check_interval_ms)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_secs as i64)
    }

    pub fn activity_refresh_min(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.activity_refresh_min_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_timings() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.cache_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.background_refresh_threshold(), Duration::from_secs(10));
        assert_eq!(cfg.throttle_window(), Duration::from_secs(1));
        assert_eq!(cfg.max_retry_attempts, 3);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: EngineConfig = toml::from_str("simulate_provider = true").unwrap();
        assert!(cfg.simulate_provider);
        assert_eq!(cfg.cache_timeout_ms, 30_000);
    }
}
