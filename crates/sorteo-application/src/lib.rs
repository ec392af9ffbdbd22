//! Application layer for Sorteo.
//!
//! This crate coordinates the domain ports into the wallet engine: session
//! persistence and cross-handle agreement, the balance cache, and the
//! connection lifecycle controller that ties them together.

pub mod balance_cache;
pub mod controller;
pub mod session_store;

pub use balance_cache::{BalanceCache, GetOptions};
pub use controller::{Connection, ConnectionController, ConnectionStatus};
pub use session_store::{
    RestoreOutcome, SessionEvent, SessionPatch, SessionStore, SESSION_KEY,
};
