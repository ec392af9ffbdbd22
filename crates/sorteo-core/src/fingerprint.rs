//! Device fingerprint model and capture interface.
//!
//! A fingerprint is a low-entropy composite signature of the execution
//! environment. It is a secondary signal used to reject an obviously
//! relocated persisted session during restore, never an authentication
//! factor on its own.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Snapshot of the environment a session was created in.
///
/// Captured once per process start and immutable afterwards. Only the
/// *key dimensions* (screen resolution, timezone, platform) participate in
/// session-restore validation; `language` and `entropy` are recorded for
/// diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintSnapshot {
    /// Display geometry as `(width, height)`; `(0, 0)` when the host has
    /// no display to report.
    pub screen: (u32, u32),
    /// IANA timezone name or UTC offset string.
    pub timezone: String,
    /// Preferred locale (e.g. `"en-US"`).
    pub language: String,
    /// Operating system and architecture tag (e.g. `"linux-x86_64"`).
    pub platform: String,
    /// Opaque digest of the composite environment.
    pub entropy: String,
}

impl FingerprintSnapshot {
    /// Builds a snapshot, deriving the entropy digest from the components.
    pub fn new(
        screen: (u32, u32),
        timezone: impl Into<String>,
        language: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        let timezone = timezone.into();
        let language = language.into();
        let platform = platform.into();
        let entropy = Self::digest(screen, &timezone, &language, &platform);
        Self {
            screen,
            timezone,
            language,
            platform,
            entropy,
        }
    }

    /// Compares the key dimensions used for session-restore validation.
    ///
    /// A stored session whose snapshot disagrees with the current device on
    /// any of these must be discarded, never silently trusted.
    pub fn matches_key_dimensions(&self, other: &FingerprintSnapshot) -> bool {
        self.screen == other.screen
            && self.timezone == other.timezone
            && self.platform == other.platform
    }

    fn digest(screen: (u32, u32), timezone: &str, language: &str, platform: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}x{}|{}|{}|{}",
            screen.0, screen.1, timezone, language, platform
        ));
        let out = hasher.finalize();
        out.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Capability that produces the current device's fingerprint.
///
/// The specific entropy source (display metrics, host environment) is an
/// implementation detail behind this interface.
pub trait FingerprintSource: Send + Sync {
    /// Captures the current environment's snapshot.
    fn capture(&self) -> FingerprintSnapshot;
}

/// A source that always returns the same snapshot.
///
/// Useful for tests and for hosts where the environment was read once at
/// startup.
#[derive(Debug, Clone)]
pub struct FixedFingerprint(pub FingerprintSnapshot);

impl FingerprintSource for FixedFingerprint {
    fn capture(&self) -> FingerprintSnapshot {
        self.0.clone()
    }
}
