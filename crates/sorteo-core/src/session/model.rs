//! Session domain model.
//!
//! The persisted record binding a wallet address to a local browser/host
//! context with an expiry and device signature.

use crate::error::SessionInvalidReason;
use crate::fingerprint::FingerprintSnapshot;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema tag written into every new session record.
///
/// Records carrying any other tag fail validation as corrupted and are
/// purged on restore.
pub const SESSION_SCHEMA_VERSION: &str = "2";

/// One authenticated session.
///
/// Created on successful authentication, mutated only through the session
/// store (activity refresh bumps `last_accessed_at`/`expires_at`), and
/// destroyed on explicit disconnect, validation failure, or expiry.
///
/// Serialized as a camelCase JSON object, the shape shared by every tab
/// of the same origin through the storage boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// External identity key.
    pub wallet_address: String,
    /// Opaque identifier, unique per creation event.
    pub session_id: String,
    /// Whether this session may be restored without prompting the user.
    pub auto_connect: bool,
    /// Persona id, set only under the simulated provider.
    #[serde(default)]
    pub mock_user_id: Option<String>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last activity-driven refresh.
    pub last_accessed_at: DateTime<Utc>,
    /// Hard expiry; a session past this instant is never accepted.
    pub expires_at: DateTime<Utc>,
    /// Environment signature captured at creation.
    pub device_fingerprint: FingerprintSnapshot,
    /// Schema compatibility tag, see [`SESSION_SCHEMA_VERSION`].
    pub version: String,
}

/// Options for session creation.
#[derive(Debug, Clone, Default)]
pub struct CreateOpts {
    /// Restore this session silently on startup.
    pub auto_connect: bool,
    /// Simulated persona id, when the simulated provider authenticated.
    pub mock_user_id: Option<String>,
}

impl Session {
    /// Creates a fresh session expiring `ttl` from now.
    pub fn new(
        wallet_address: impl Into<String>,
        device_fingerprint: FingerprintSnapshot,
        ttl: Duration,
        opts: CreateOpts,
    ) -> Self {
        let now = Utc::now();
        Self {
            wallet_address: wallet_address.into(),
            session_id: Uuid::new_v4().to_string(),
            auto_connect: opts.auto_connect,
            mock_user_id: opts.mock_user_id,
            created_at: now,
            last_accessed_at: now,
            expires_at: now + ttl,
            device_fingerprint,
            version: SESSION_SCHEMA_VERSION.to_string(),
        }
    }

    /// Whether the session has lapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time elapsed since creation at `now` (zero if clocks ran backwards).
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).max(Duration::zero())
    }

    /// Bumps activity timestamps, extending the expiry by `ttl` from `now`.
    pub fn touch(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.last_accessed_at = now;
        self.expires_at = now + ttl;
    }

    /// Validates the record against the current schema, clock, and device.
    ///
    /// Check order mirrors the distinct failure causes a caller may want to
    /// report: structural integrity first (corrupted), then expiry, then
    /// device fingerprint. Returns the first failing reason.
    pub fn validate_at(
        &self,
        now: DateTime<Utc>,
        current: &FingerprintSnapshot,
    ) -> std::result::Result<(), SessionInvalidReason> {
        if self.version != SESSION_SCHEMA_VERSION {
            return Err(SessionInvalidReason::Corrupted);
        }
        if self.wallet_address.is_empty() || self.session_id.is_empty() {
            return Err(SessionInvalidReason::Corrupted);
        }
        if self.expires_at <= self.created_at {
            return Err(SessionInvalidReason::Corrupted);
        }
        if self.is_expired_at(now) {
            return Err(SessionInvalidReason::Expired);
        }
        if !self.device_fingerprint.matches_key_dimensions(current) {
            return Err(SessionInvalidReason::FingerprintMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint() -> FingerprintSnapshot {
        FingerprintSnapshot::new((1920, 1080), "UTC", "en-US", "linux-x86_64")
    }

    fn session() -> Session {
        Session::new(
            "0xabc123",
            fingerprint(),
            Duration::hours(24),
            CreateOpts::default(),
        )
    }

    #[test]
    fn test_new_session_invariants() {
        let s = session();
        assert!(s.expires_at > s.created_at);
        assert_eq!(s.version, SESSION_SCHEMA_VERSION);
        assert!(s.validate_at(Utc::now(), &fingerprint()).is_ok());
    }

    #[test]
    fn test_session_ids_unique_per_creation() {
        assert_ne!(session().session_id, session().session_id);
    }

    #[test]
    fn test_expired_session_rejected() {
        let s = session();
        let later = s.expires_at + Duration::seconds(1);
        assert_eq!(
            s.validate_at(later, &fingerprint()),
            Err(SessionInvalidReason::Expired)
        );
    }

    #[test]
    fn test_version_mismatch_is_corrupted() {
        let mut s = session();
        s.version = "1".to_string();
        assert_eq!(
            s.validate_at(Utc::now(), &fingerprint()),
            Err(SessionInvalidReason::Corrupted)
        );
    }

    #[test]
    fn test_fingerprint_mismatch_rejected() {
        let s = session();
        let other = FingerprintSnapshot::new((1920, 1080), "UTC", "en-US", "windows-x86_64");
        assert_eq!(
            s.validate_at(Utc::now(), &other),
            Err(SessionInvalidReason::FingerprintMismatch)
        );
    }

    #[test]
    fn test_touch_extends_expiry() {
        let mut s = session();
        let old_expiry = s.expires_at;
        let now = Utc::now() + Duration::hours(1);
        s.touch(now, Duration::hours(24));
        assert!(s.expires_at > old_expiry);
        assert_eq!(s.last_accessed_at, now);
    }

    #[test]
    fn test_record_round_trips_as_camel_case() {
        let s = session();
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"walletAddress\""));
        assert!(json.contains("\"expiresAt\""));
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
