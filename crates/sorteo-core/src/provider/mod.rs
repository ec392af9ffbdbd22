//! Wallet provider interface.
//!
//! A uniform surface over the host wallet application: install check,
//! nonce-based authentication, and a stable current-user accessor. The
//! infrastructure layer ships two implementations, a bridge adapter
//! delegating to the real wallet app and a simulated adapter returning
//! persona-based identities. The engine is written against this trait
//! only, so swapping them never touches the controller, session store, or
//! balance cache.

mod persona;
mod preset;

pub use persona::Persona;
pub use preset::builtin_personas;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The identity a provider currently reports, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletIdentity {
    /// Wallet address of the signed-in user.
    pub address: String,
    /// Display username, when the wallet app exposes one.
    pub username: Option<String>,
    /// Persona id, reported only by the simulated provider.
    #[serde(default)]
    pub persona_id: Option<String>,
}

/// Input to a nonce-based authentication request.
///
/// Field names follow the wallet SDK's wire contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    /// Backend-issued nonce the wallet signs over.
    pub nonce: String,
    /// Unique id for this request.
    pub request_id: String,
    /// Instant after which the request is no longer valid.
    pub expiration_time: DateTime<Utc>,
    /// Instant before which the request is not yet valid.
    pub not_before: DateTime<Utc>,
    /// Human-readable statement shown by the wallet app.
    pub statement: String,
}

impl AuthRequest {
    /// Validity window for a freshly built request.
    const VALID_FOR_MINUTES: i64 = 10;

    /// Builds a request around `nonce` with a fresh id and a ten-minute
    /// validity window starting now.
    pub fn new(nonce: impl Into<String>, statement: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            nonce: nonce.into(),
            request_id: Uuid::new_v4().to_string(),
            expiration_time: now + Duration::minutes(Self::VALID_FOR_MINUTES),
            not_before: now,
            statement: statement.into(),
        }
    }
}

/// Successful authentication result.
///
/// Failures are reported as [`crate::WalletError::AuthFailed`] (with the
/// `cancelled` flag set for explicit user cancellation) rather than an
/// error-status payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    /// Address the wallet authenticated as.
    pub address: String,
    /// Signature over the request.
    pub signature: String,
    /// Echo of the request nonce.
    pub nonce: String,
}

/// Uniform interface over the wallet SDK, real or simulated.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Whether the provider is installed and reachable.
    async fn is_available(&self) -> bool;

    /// Runs nonce-based authentication.
    ///
    /// # Returns
    ///
    /// - `Ok(AuthResponse)`: the wallet signed the request
    /// - `Err(WalletError::AuthFailed { cancelled: true, .. })`: the user
    ///   dismissed the prompt
    /// - `Err(WalletError::AuthFailed { .. })`: the wallet rejected the
    ///   request
    /// - `Err(WalletError::Network(_))`: transport failure
    async fn authenticate(&self, request: AuthRequest) -> Result<AuthResponse>;

    /// The identity the provider currently reports, or `None` when nobody
    /// is signed in (an external disconnect from the engine's point of
    /// view).
    async fn current_identity(&self) -> Option<WalletIdentity>;
}
