//! Backend authentication API interface.
//!
//! The nonce issuance and login verification endpoints are external
//! collaborators; the engine treats their calls as opaque and only depends
//! on this trait. The precise payload schema is owned by the backend.

use crate::error::Result;
use crate::provider::AuthResponse;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Signed login proof submitted for backend verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    /// Address the wallet signed as.
    pub address: String,
    /// Signature over the authentication request.
    pub signature: String,
    /// Nonce that was issued for this login.
    pub nonce: String,
}

impl From<&AuthResponse> for LoginPayload {
    fn from(response: &AuthResponse) -> Self {
        Self {
            address: response.address.clone(),
            signature: response.signature.clone(),
            nonce: response.nonce.clone(),
        }
    }
}

/// Client for the backend auth endpoints.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Obtains a one-time nonce for the next authentication attempt.
    async fn fetch_nonce(&self) -> Result<String>;

    /// Submits the signed payload for verification.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: the backend accepted the login
    /// - `Err(WalletError::AuthFailed { .. })`: verification rejected
    /// - `Err(WalletError::Network(_))`: transport failure
    async fn complete_login(&self, payload: &LoginPayload) -> Result<()>;

    /// Tells the backend the session ended. Best effort; callers may
    /// ignore failures.
    async fn logout(&self) -> Result<()>;
}
