//! Token balance model and fetch interface.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Symbol appended to formatted balance strings.
pub const TOKEN_SYMBOL: &str = "WLD";

/// Cached balance state for one address.
///
/// Owned by the balance cache; everything else reads clones. `error` holds
/// the last fetch failure after retries were exhausted, and the next lookup
/// attempts a fresh fetch rather than replaying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    /// Token amount as a display value.
    pub amount: f64,
    /// Pre-rendered display string, e.g. `"100.00 WLD"`.
    pub formatted: String,
    /// Wall-clock instant the amount was last fetched.
    pub last_updated: DateTime<Utc>,
    /// A fetch for this address is currently in flight.
    pub is_loading: bool,
    /// Message of the last exhausted fetch failure.
    pub error: Option<String>,
}

impl Balance {
    /// Zero balance with a loading flag, used before the first fetch lands.
    pub fn loading() -> Self {
        Self {
            amount: 0.0,
            formatted: format_amount(0.0),
            last_updated: Utc::now(),
            is_loading: true,
            error: None,
        }
    }

    /// A settled balance fetched now.
    pub fn settled(amount: f64) -> Self {
        Self {
            amount,
            formatted: format_amount(amount),
            last_updated: Utc::now(),
            is_loading: false,
            error: None,
        }
    }
}

/// Renders an amount the way the UI displays it.
pub fn format_amount(amount: f64) -> String {
    format!("{:.2} {}", amount, TOKEN_SYMBOL)
}

/// Raw result of one upstream balance fetch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceQuote {
    /// Token amount reported upstream.
    pub amount: f64,
}

/// Upstream source of token balances (balance API or provider).
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Fetches the current balance for `address`.
    async fn fetch_balance(&self, address: &str) -> Result<BalanceQuote>;
}
