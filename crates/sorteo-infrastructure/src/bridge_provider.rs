//! Wallet provider backed by the host wallet app's local bridge.
//!
//! The bridge is a small HTTP surface the wallet app exposes on localhost:
//! `GET /health` for reachability, `POST /wallet-auth` to run a signing
//! prompt in front of the user, `GET /session` for the identity the app
//! currently holds. Signing waits on a human, so the auth call gets a much
//! longer per-request timeout than the rest.

use async_trait::async_trait;
use serde::Deserialize;
use sorteo_core::provider::{AuthRequest, AuthResponse, WalletIdentity, WalletProvider};
use sorteo_core::{Result, WalletError};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on how long the user gets to approve or dismiss the prompt.
const AUTH_PROMPT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    cancelled: bool,
}

/// Wallet provider over the local bridge endpoint.
pub struct BridgeProvider {
    client: reqwest::Client,
    base_url: String,
}

impl BridgeProvider {
    /// Creates a provider for the bridge at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WalletError::internal(format!("http client init failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl WalletProvider for BridgeProvider {
    async fn is_available(&self) -> bool {
        match self.client.get(self.endpoint("health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn authenticate(&self, request: AuthRequest) -> Result<AuthResponse> {
        let response = self
            .client
            .post(self.endpoint("wallet-auth"))
            .timeout(AUTH_PROMPT_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WalletError::auth_failed("wallet prompt timed out")
                } else {
                    WalletError::network(format!("bridge unreachable: {}", e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| WalletError::network(format!("bridge decode failed: {}", e)));
        }

        if status.is_client_error() {
            let body: BridgeErrorBody = response.json().await.unwrap_or_default();
            if body.cancelled {
                return Err(WalletError::auth_cancelled());
            }
            let reason = if body.error.is_empty() {
                format!("bridge rejected auth ({})", status)
            } else {
                body.error
            };
            return Err(WalletError::auth_failed(reason));
        }

        Err(WalletError::network(format!(
            "bridge returned {}",
            status
        )))
    }

    async fn current_identity(&self) -> Option<WalletIdentity> {
        let response = match self.client.get(self.endpoint("session")).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("bridge session lookup failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            return None;
        }
        response.json().await.ok()
    }
}
