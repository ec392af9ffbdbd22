//! Configuration service implementation.
//!
//! Loads the engine configuration from the platform config file
//! (`~/.config/sorteo/config.toml`), applies `SORTEO_*` environment
//! overrides, and caches the result to avoid repeated file I/O.

use crate::paths::SorteoPaths;
use sorteo_core::config::EngineConfig;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Configuration service that loads and caches the engine configuration.
#[derive(Clone)]
pub struct ConfigService {
    /// Cached configuration loaded from file.
    /// Uses RwLock for thread-safe lazy loading.
    config: Arc<RwLock<Option<EngineConfig>>>,
    path: Option<PathBuf>,
}

impl ConfigService {
    /// Creates a service over the platform default config file.
    ///
    /// The configuration is loaded lazily on first access.
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(None)),
            path: None,
        }
    }

    /// Creates a service over an explicit config file path.
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            config: Arc::new(RwLock::new(None)),
            path: Some(path),
        }
    }

    /// Gets the engine configuration, loading from file if not cached.
    ///
    /// A missing or unreadable file falls back to defaults; environment
    /// overrides are applied on top either way.
    pub fn get_config(&self) -> EngineConfig {
        {
            let read_lock = self.config.read().unwrap();
            if let Some(ref cached) = *read_lock {
                return cached.clone();
            }
        }

        let mut loaded = self.load_from_file().unwrap_or_default();
        apply_env_overrides(&mut loaded);

        {
            let mut write_lock = self.config.write().unwrap();
            *write_lock = Some(loaded.clone());
        }

        loaded
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub fn invalidate_cache(&self) {
        let mut write_lock = self.config.write().unwrap();
        *write_lock = None;
    }

    /// Writes a default config file if none exists yet.
    ///
    /// # Returns
    ///
    /// The path of the config file, existing or newly created.
    pub fn ensure_config_file(&self) -> std::io::Result<PathBuf> {
        let path = self
            .config_path()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no config dir"))?;

        if path.exists() {
            return Ok(path);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(&EngineConfig::default())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, rendered)?;

        Ok(path)
    }

    fn config_path(&self) -> Option<PathBuf> {
        match &self.path {
            Some(path) => Some(path.clone()),
            None => SorteoPaths::config_file().ok(),
        }
    }

    fn load_from_file(&self) -> Option<EngineConfig> {
        let path = self.config_path()?;
        if !path.exists() {
            return None;
        }
        let content = std::fs::read_to_string(&path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("ignoring malformed config at {}: {}", path.display(), e);
                None
            }
        }
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies `SORTEO_*` environment overrides on top of a loaded config.
fn apply_env_overrides(config: &mut EngineConfig) {
    if let Some(v) = env_bool("SORTEO_SIMULATE") {
        config.simulate_provider = v;
    }
    if let Some(v) = env_bool("SORTEO_SIMULATE_DELAY") {
        config.simulate_delay = v;
    }
    if let Ok(v) = std::env::var("SORTEO_AUTH_URL") {
        config.auth_base_url = v;
    }
    if let Ok(v) = std::env::var("SORTEO_BRIDGE_URL") {
        config.bridge_url = v;
    }
    if let Ok(v) = std::env::var("SORTEO_BALANCE_URL") {
        config.balance_url = v;
    }
    if let Some(v) = std::env::var("SORTEO_SESSION_TTL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
    {
        config.session_ttl_secs = v;
    }
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| parse_bool(&v))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "yes")
}
