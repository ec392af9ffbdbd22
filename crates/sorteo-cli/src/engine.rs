//! Wires the engine out of the configured adapters.

use std::sync::Arc;

use anyhow::Result;
use sorteo_application::{BalanceCache, ConnectionController, SessionStore};
use sorteo_core::auth::AuthApi;
use sorteo_core::balance::BalanceSource;
use sorteo_core::config::EngineConfig;
use sorteo_core::provider::WalletProvider;
use sorteo_infrastructure::{
    BridgeProvider, ConfigService, HostFingerprint, HttpAuthApi, HttpBalanceSource, JsonFileStore,
    SimulatedAuthApi, SimulatedProvider,
};

/// A fully wired controller plus the handles a command may need around it.
pub struct Engine {
    pub controller: ConnectionController,
    pub config: EngineConfig,
    /// Present only when `simulate_provider` is on.
    pub simulated: Option<SimulatedProvider>,
}

/// Builds the engine over the platform state file, choosing simulated or
/// HTTP adapters per the loaded config.
pub fn build() -> Result<Engine> {
    let config = ConfigService::new().get_config();

    let (provider, auth, source, simulated): (
        Arc<dyn WalletProvider>,
        Arc<dyn AuthApi>,
        Arc<dyn BalanceSource>,
        Option<SimulatedProvider>,
    ) = if config.simulate_provider {
        let sim = SimulatedProvider::with_builtin_personas(config.simulate_delay);
        (
            Arc::new(sim.clone()),
            Arc::new(SimulatedAuthApi::new(config.simulate_delay)),
            Arc::new(sim.balance_source()),
            Some(sim),
        )
    } else {
        (
            Arc::new(BridgeProvider::new(config.bridge_url.clone())?),
            Arc::new(HttpAuthApi::new(config.auth_base_url.clone())?),
            Arc::new(HttpBalanceSource::new(config.balance_url.clone())?),
            None,
        )
    };

    let store = Arc::new(JsonFileStore::at_default_location()?);
    let sessions = Arc::new(SessionStore::new(store, &HostFingerprint::new(), &config));
    let balances = BalanceCache::new(source, &config);
    let controller = ConnectionController::new(provider, auth, sessions, balances, &config);
    tracing::debug!(simulate = config.simulate_provider, "engine wired");

    Ok(Engine {
        controller,
        config,
        simulated,
    })
}
