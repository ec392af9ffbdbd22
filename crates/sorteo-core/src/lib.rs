pub mod auth;
pub mod backoff;
pub mod balance;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod provider;
pub mod session;
pub mod store;

// Re-export common error types
pub use error::{ErrorReport, Result, SessionInvalidReason, WalletError};
