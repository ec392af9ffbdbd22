//! Storage primitives shared by the persistent adapters.

pub mod atomic_json;

pub use atomic_json::{AtomicJsonError, AtomicJsonFile};
