//! Session domain module.
//!
//! Contains the persisted session record and its validation rules. The
//! lifecycle logic that creates, restores, and synchronizes sessions lives
//! in the application layer.

mod model;

pub use model::{CreateOpts, SESSION_SCHEMA_VERSION, Session};
