//! Unified path management for sorteo configuration and state files.
//!
//! All configuration and persisted wallet state resolve through
//! `SorteoPaths` so every storage mechanism agrees on the layout.

use std::path::PathBuf;

/// Errors that can occur during path resolution.
#[derive(Debug)]
pub enum PathError {
    /// Home directory could not be determined.
    HomeDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::HomeDirNotFound => write!(f, "Cannot find home directory"),
        }
    }
}

impl std::error::Error for PathError {}

/// Unified path management for sorteo.
///
/// # Directory Structure
///
/// ```text
/// ~/.config/sorteo/            # Config directory
/// └── config.toml              # Engine configuration
///
/// ~/.local/share/sorteo/       # Data directory
/// └── wallet_state.json        # Persisted key-value store (session etc.)
/// ```
pub struct SorteoPaths;

impl SorteoPaths {
    /// Returns the sorteo configuration directory.
    ///
    /// # Returns
    ///
    /// - `Ok(PathBuf)`: Path to config directory (e.g., `~/.config/sorteo/`)
    /// - `Err(PathError::HomeDirNotFound)`: Could not determine directory
    pub fn config_dir() -> Result<PathBuf, PathError> {
        dirs::config_dir()
            .map(|d| d.join("sorteo"))
            .ok_or(PathError::HomeDirNotFound)
    }

    /// Returns the sorteo data directory, used for persisted wallet state.
    pub fn data_dir() -> Result<PathBuf, PathError> {
        dirs::data_dir()
            .map(|d| d.join("sorteo"))
            .ok_or(PathError::HomeDirNotFound)
    }

    /// Returns the path to the main configuration file.
    pub fn config_file() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Returns the path to the persisted key-value store file.
    pub fn state_file() -> Result<PathBuf, PathError> {
        Ok(Self::data_dir()?.join("wallet_state.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_under_config_dir() {
        let config_file = SorteoPaths::config_file().unwrap();
        assert!(config_file.ends_with("config.toml"));
        let config_dir = SorteoPaths::config_dir().unwrap();
        assert!(config_file.starts_with(&config_dir));
    }

    #[test]
    fn test_state_file_under_data_dir() {
        let state_file = SorteoPaths::state_file().unwrap();
        assert!(state_file.ends_with("wallet_state.json"));
        let data_dir = SorteoPaths::data_dir().unwrap();
        assert!(state_file.starts_with(&data_dir));
    }
}
