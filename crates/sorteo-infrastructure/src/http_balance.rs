//! HTTP client for the external token balance API.
//!
//! The endpoint returns the WLD balance for one address per request. Some
//! deployments serialize the amount as a JSON number, others as a decimal
//! string, so both are accepted.

use async_trait::async_trait;
use serde::Deserialize;
use sorteo_core::balance::{BalanceQuote, BalanceSource};
use sorteo_core::{Result, WalletError};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Amount {
    Number(f64),
    Text(String),
}

impl Amount {
    fn as_f64(&self) -> Result<f64> {
        match self {
            Amount::Number(n) => Ok(*n),
            Amount::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| WalletError::network(format!("unparseable balance: {:?}", s))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: Amount,
}

/// Balance source over HTTP.
pub struct HttpBalanceSource {
    client: reqwest::Client,
    url: String,
}

impl HttpBalanceSource {
    /// Creates a client for the balance endpoint at `url`.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WalletError::internal(format!("http client init failed: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl BalanceSource for HttpBalanceSource {
    async fn fetch_balance(&self, address: &str) -> Result<BalanceQuote> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("address", address)])
            .send()
            .await
            .map_err(|e| WalletError::network(format!("balance request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WalletError::network(format!(
                "balance endpoint returned {}",
                status
            )));
        }

        let body: BalanceResponse = response
            .json()
            .await
            .map_err(|e| WalletError::network(format!("balance decode failed: {}", e)))?;

        Ok(BalanceQuote {
            amount: body.balance.as_f64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_accepts_number_and_string() {
        let n: BalanceResponse = serde_json::from_str(r#"{"balance": 12.5}"#).unwrap();
        assert_eq!(n.balance.as_f64().unwrap(), 12.5);

        let s: BalanceResponse = serde_json::from_str(r#"{"balance": "0.75"}"#).unwrap();
        assert_eq!(s.balance.as_f64().unwrap(), 0.75);
    }

    #[test]
    fn test_garbage_amount_is_an_error() {
        let bad: BalanceResponse = serde_json::from_str(r#"{"balance": "lots"}"#).unwrap();
        assert!(bad.balance.as_f64().is_err());
    }
}
