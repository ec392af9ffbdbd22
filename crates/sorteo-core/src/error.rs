//! Error types for the Sorteo wallet engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a persisted session failed validation.
///
/// The remediation is identical for every variant (purge the record and
/// require fresh authentication), but callers want the distinct cause for
/// user messaging.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionInvalidReason {
    /// `expires_at` is in the past.
    #[error("session expired")]
    Expired,
    /// The record could not be parsed, is missing required fields, or
    /// carries an unknown schema version.
    #[error("session record corrupted")]
    Corrupted,
    /// The stored device fingerprint disagrees with this device on key
    /// dimensions (screen resolution, timezone, platform).
    #[error("session failed device verification")]
    FingerprintMismatch,
}

/// A shared error type for the wallet engine.
///
/// Low-level components (session store, balance cache, providers) return
/// these typed variants; the connection controller is the single point that
/// flattens them into the stable [`ErrorReport`] shape consumed by UI.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum WalletError {
    /// The wallet provider is not installed or not reachable. Fatal
    /// precondition: never retried automatically.
    #[error("wallet provider is not installed or enabled")]
    ProviderUnavailable,

    /// Authentication was rejected. `cancelled` marks an explicit user
    /// cancellation, which must never be retried.
    #[error("authentication failed: {reason}")]
    AuthFailed { reason: String, cancelled: bool },

    /// Transient transport failure. Automatically retried with backoff up
    /// to a cap, then surfaced.
    #[error("network error: {0}")]
    Network(String),

    /// A persisted session failed validation and has been purged.
    #[error("invalid session: {0}")]
    SessionInvalid(SessionInvalidReason),

    /// Business rejection: the wallet holds less than the operation needs.
    #[error("insufficient balance: have {available}, need {required}")]
    InsufficientBalance { available: String, required: String },

    /// Storage layer failure (persistence read/write, serialization).
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal error (should not happen in normal operation).
    #[error("internal error: {0}")]
    Internal(String),
}

impl WalletError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates an AuthFailed error for a provider rejection.
    pub fn auth_failed(reason: impl Into<String>) -> Self {
        Self::AuthFailed {
            reason: reason.into(),
            cancelled: false,
        }
    }

    /// Creates an AuthFailed error for an explicit user cancellation.
    pub fn auth_cancelled() -> Self {
        Self::AuthFailed {
            reason: "cancelled by user".to_string(),
            cancelled: true,
        }
    }

    /// Creates a Network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Creates a Storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Creates an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this is a Network error.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Check if this is a user-cancelled authentication.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::AuthFailed { cancelled: true, .. })
    }

    /// Check if this is a SessionInvalid error.
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, Self::SessionInvalid(_))
    }

    /// Whether a retry affordance makes sense for this error.
    ///
    /// Only `Network` errors are retried automatically; `AuthFailed` without
    /// cancellation is retryable by user action. Everything else needs a
    /// corrective action instead (install the provider, re-authenticate,
    /// reduce the amount).
    pub fn retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::AuthFailed { cancelled, .. } => !cancelled,
            _ => false,
        }
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProviderUnavailable => "provider_unavailable",
            Self::AuthFailed { .. } => "auth_failed",
            Self::Network(_) => "network_error",
            Self::SessionInvalid(_) => "session_invalid",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::Storage(_) => "storage_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for WalletError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(format!("{} (kind: {:?})", err, err.kind()))
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("JSON: {}", err))
    }
}

/// The stable error shape exposed to engine consumers.
///
/// UI code never matches on [`WalletError`] variants directly; the
/// controller classifies every failure into this `{code, message,
/// retryable}` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Stable machine-readable code (e.g. `"network_error"`).
    pub code: String,
    /// Human-readable description suitable for display.
    pub message: String,
    /// Whether the UI should present a retry affordance.
    pub retryable: bool,
}

impl ErrorReport {
    /// Report for a cross-tab identity conflict awaiting user resolution.
    pub fn session_conflict(current: &str, incoming: &str) -> Self {
        Self {
            code: "session_conflict".to_string(),
            message: format!(
                "another tab signed in as {} while this tab holds {}",
                incoming, current
            ),
            retryable: false,
        }
    }

    /// Report for a wallet-side sign-out observed during refresh.
    ///
    /// An external disconnect, not a failure: retrying cannot help, the
    /// user has to authenticate again.
    pub fn signed_out() -> Self {
        Self {
            code: "signed_out".to_string(),
            message: "wallet signed out externally".to_string(),
            retryable: false,
        }
    }

    /// Report for an operation rendered inert by a disconnect that landed
    /// while it was in flight.
    pub fn cancelled() -> Self {
        Self {
            code: "cancelled".to_string(),
            message: "operation superseded by disconnect".to_string(),
            retryable: false,
        }
    }

    /// Report for an operation that requires an active connection.
    pub fn not_connected() -> Self {
        Self {
            code: "not_connected".to_string(),
            message: "no wallet is connected".to_string(),
            retryable: false,
        }
    }
}

impl From<&WalletError> for ErrorReport {
    fn from(err: &WalletError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.retryable(),
        }
    }
}

impl From<WalletError> for ErrorReport {
    fn from(err: WalletError) -> Self {
        Self::from(&err)
    }
}

/// A type alias for `Result<T, WalletError>`.
pub type Result<T> = std::result::Result<T, WalletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(WalletError::network("timeout").retryable());
        assert!(WalletError::auth_failed("bad signature").retryable());
        assert!(!WalletError::auth_cancelled().retryable());
        assert!(!WalletError::ProviderUnavailable.retryable());
        assert!(!WalletError::SessionInvalid(SessionInvalidReason::Expired).retryable());
    }

    #[test]
    fn test_signed_out_is_not_retryable() {
        let report = ErrorReport::signed_out();
        assert_eq!(report.code, "signed_out");
        assert!(!report.retryable);
    }

    #[test]
    fn test_report_preserves_invalid_reason() {
        let expired = ErrorReport::from(WalletError::SessionInvalid(SessionInvalidReason::Expired));
        let mismatch = ErrorReport::from(WalletError::SessionInvalid(
            SessionInvalidReason::FingerprintMismatch,
        ));

        assert_eq!(expired.code, "session_invalid");
        assert_eq!(mismatch.code, "session_invalid");
        // Same remediation, distinct user messaging.
        assert_ne!(expired.message, mismatch.message);
    }
}
