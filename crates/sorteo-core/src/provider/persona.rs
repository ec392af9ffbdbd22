//! Persona domain model.
//!
//! A persona is a named simulated identity profile used in place of a real
//! wallet provider during development and testing.

use serde::{Deserialize, Serialize};

/// A simulated wallet identity with deterministic credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    /// Stable identifier used as `mock_user_id` in sessions.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Deterministic wallet address this persona authenticates as.
    pub wallet_address: String,
    /// Username the simulated wallet app reports.
    pub username: String,
    /// Token balance the simulated balance source serves.
    pub balance: f64,
}
