pub mod bridge_provider;
pub mod config_service;
pub mod host_fingerprint;
pub mod http_auth_api;
pub mod http_balance;
pub mod json_file_store;
pub mod memory_store;
pub mod paths;
pub mod sim_provider;
pub mod storage;

pub use crate::bridge_provider::BridgeProvider;
pub use crate::config_service::ConfigService;
pub use crate::host_fingerprint::HostFingerprint;
pub use crate::http_auth_api::HttpAuthApi;
pub use crate::http_balance::HttpBalanceSource;
pub use crate::json_file_store::JsonFileStore;
pub use crate::memory_store::MemoryStore;
pub use crate::sim_provider::{SimulatedAuthApi, SimulatedBalanceSource, SimulatedProvider};
