//! Simulated wallet adapters.
//!
//! Development and test doubles for the wallet provider, the auth backend,
//! and the balance source. All simulated state is constructor-injected and
//! instance-local, so two simulated providers never observe each other.
//! Failure injection lets tests drive the retry and error paths without a
//! network.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sorteo_core::auth::{AuthApi, LoginPayload};
use sorteo_core::balance::{BalanceQuote, BalanceSource};
use sorteo_core::provider::{
    builtin_personas, AuthRequest, AuthResponse, Persona, WalletIdentity, WalletProvider,
};
use sorteo_core::{Result, WalletError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Artificial latency for wallet prompts when delays are enabled.
const AUTH_DELAY: Duration = Duration::from_millis(300);
/// Artificial latency for balance lookups when delays are enabled.
const FETCH_DELAY: Duration = Duration::from_millis(150);

struct SimState {
    personas: Vec<Persona>,
    active: RwLock<usize>,
    signed_in: RwLock<bool>,
    fail_next_auth: Mutex<Option<WalletError>>,
    balance_failures: Mutex<u32>,
    delay: bool,
}

impl SimState {
    fn active_persona(&self) -> Persona {
        let idx = *self.active.read().unwrap();
        self.personas[idx].clone()
    }

    async fn maybe_delay(&self, duration: Duration) {
        if self.delay {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Wallet provider backed by an in-process persona roster.
#[derive(Clone)]
pub struct SimulatedProvider {
    state: Arc<SimState>,
}

impl SimulatedProvider {
    /// Creates a provider over the given personas.
    ///
    /// An empty roster falls back to the built-in presets. The first
    /// persona starts active and signed in.
    pub fn new(personas: Vec<Persona>, simulate_delay: bool) -> Self {
        let personas = if personas.is_empty() {
            builtin_personas()
        } else {
            personas
        };
        Self {
            state: Arc::new(SimState {
                personas,
                active: RwLock::new(0),
                signed_in: RwLock::new(true),
                fail_next_auth: Mutex::new(None),
                balance_failures: Mutex::new(0),
                delay: simulate_delay,
            }),
        }
    }

    pub fn with_builtin_personas(simulate_delay: bool) -> Self {
        Self::new(builtin_personas(), simulate_delay)
    }

    pub fn personas(&self) -> &[Persona] {
        &self.state.personas
    }

    pub fn active_persona(&self) -> Persona {
        self.state.active_persona()
    }

    /// Switches the active persona by id.
    ///
    /// Signs the wallet back in if it was signed out, mirroring a user
    /// picking an account in the host app.
    pub fn switch_persona(&self, id: &str) -> Result<Persona> {
        let idx = self
            .state
            .personas
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| WalletError::internal(format!("unknown persona: {}", id)))?;
        *self.state.active.write().unwrap() = idx;
        *self.state.signed_in.write().unwrap() = true;
        Ok(self.state.personas[idx].clone())
    }

    /// Simulates the user signing out of the host wallet app.
    pub fn sign_out(&self) {
        *self.state.signed_in.write().unwrap() = false;
    }

    /// The next `authenticate` call fails with `error` instead of signing.
    pub fn inject_auth_failure(&self, error: WalletError) {
        *self.state.fail_next_auth.lock().unwrap() = Some(error);
    }

    /// The next `count` balance fetches fail with a network error.
    pub fn inject_balance_failures(&self, count: u32) {
        *self.state.balance_failures.lock().unwrap() = count;
    }

    /// A balance source sharing this provider's persona state.
    pub fn balance_source(&self) -> SimulatedBalanceSource {
        SimulatedBalanceSource {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl WalletProvider for SimulatedProvider {
    async fn is_available(&self) -> bool {
        true
    }

    async fn authenticate(&self, request: AuthRequest) -> Result<AuthResponse> {
        self.state.maybe_delay(AUTH_DELAY).await;

        if let Some(error) = self.state.fail_next_auth.lock().unwrap().take() {
            return Err(error);
        }
        if request.nonce.is_empty() {
            return Err(WalletError::auth_failed("empty nonce"));
        }

        let persona = self.state.active_persona();
        *self.state.signed_in.write().unwrap() = true;
        Ok(AuthResponse {
            address: persona.wallet_address.clone(),
            signature: sign(&persona.wallet_address, &request.nonce),
            nonce: request.nonce,
        })
    }

    async fn current_identity(&self) -> Option<WalletIdentity> {
        if !*self.state.signed_in.read().unwrap() {
            return None;
        }
        let persona = self.state.active_persona();
        Some(WalletIdentity {
            address: persona.wallet_address,
            username: Some(persona.username),
            persona_id: Some(persona.id),
        })
    }
}

/// Balance source reading from the simulated persona roster.
pub struct SimulatedBalanceSource {
    state: Arc<SimState>,
}

#[async_trait]
impl BalanceSource for SimulatedBalanceSource {
    async fn fetch_balance(&self, address: &str) -> Result<BalanceQuote> {
        self.state.maybe_delay(FETCH_DELAY).await;

        {
            let mut failures = self.state.balance_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(WalletError::network("simulated balance outage"));
            }
        }

        let amount = self
            .state
            .personas
            .iter()
            .find(|p| p.wallet_address.eq_ignore_ascii_case(address))
            .map(|p| p.balance)
            .unwrap_or(0.0);
        Ok(BalanceQuote { amount })
    }
}

/// Auth backend double that issues and verifies its own nonces.
pub struct SimulatedAuthApi {
    issued: Mutex<HashSet<String>>,
    delay: bool,
}

impl SimulatedAuthApi {
    pub fn new(simulate_delay: bool) -> Self {
        Self {
            issued: Mutex::new(HashSet::new()),
            delay: simulate_delay,
        }
    }
}

#[async_trait]
impl AuthApi for SimulatedAuthApi {
    async fn fetch_nonce(&self) -> Result<String> {
        if self.delay {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let bytes: [u8; 16] = rand::random();
        let nonce: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        self.issued.lock().unwrap().insert(nonce.clone());
        Ok(nonce)
    }

    async fn complete_login(&self, payload: &LoginPayload) -> Result<()> {
        if self.delay {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if !self.issued.lock().unwrap().remove(&payload.nonce) {
            return Err(WalletError::auth_failed("unknown or reused nonce"));
        }
        if payload.signature.is_empty() {
            return Err(WalletError::auth_failed("missing signature"));
        }
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        Ok(())
    }
}

/// Deterministic stand-in for a wallet signature.
fn sign(address: &str, nonce: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(address.as_bytes());
    hasher.update(b":");
    hasher.update(nonce.as_bytes());
    let out = hasher.finalize();
    let hex: String = out.iter().map(|b| format!("{:02x}", b)).collect();
    format!("0x{}", hex)
}
