//! HTTP client for the backend auth API.
//!
//! Three endpoints: `GET /nonce` issues a one-time nonce, `POST
//! /complete-siwe` verifies a signed payload server-side, `POST /logout`
//! ends the backend session. Transport failures surface as
//! `WalletError::Network`, verification rejections as `AuthFailed`.

use async_trait::async_trait;
use serde::Deserialize;
use sorteo_core::auth::{AuthApi, LoginPayload};
use sorteo_core::{Result, WalletError};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct NonceResponse {
    nonce: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteLoginResponse {
    #[serde(default)]
    is_valid: bool,
    message: Option<String>,
}

/// Auth API client over HTTP.
pub struct HttpAuthApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthApi {
    /// Creates a client for the API rooted at `base_url`.
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
impl AuthApi for HttpAuthApi {
    async fn fetch_nonce(&self) -> Result<String> {
        let url = self.endpoint("nonce");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| WalletError::network(format!("nonce request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WalletError::network(format!(
                "nonce endpoint returned {}",
                status
            )));
        }

        let body: NonceResponse = response
            .json()
            .await
            .map_err(|e| WalletError::network(format!("nonce decode failed: {}", e)))?;

        if body.nonce.is_empty() {
            return Err(WalletError::auth_failed("backend issued an empty nonce"));
        }
        Ok(body.nonce)
    }

    async fn complete_login(&self, payload: &LoginPayload) -> Result<()> {
        let url = self.endpoint("complete-siwe");
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| WalletError::network(format!("login request failed: {}", e)))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(WalletError::auth_failed(format!(
                "backend rejected login ({})",
                status
            )));
        }
        if !status.is_success() {
            return Err(WalletError::network(format!(
                "login endpoint returned {}",
                status
            )));
        }

        let body: CompleteLoginResponse = response
            .json()
            .await
            .map_err(|e| WalletError::network(format!("login decode failed: {}", e)))?;

        if !body.is_valid {
            let reason = body
                .message
                .unwrap_or_else(|| "signature verification failed".to_string());
            return Err(WalletError::auth_failed(reason));
        }
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        let url = self.endpoint("logout");
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| WalletError::network(format!("logout request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(WalletError::network(format!(
                "logout endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
