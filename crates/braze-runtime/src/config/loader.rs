//! Configuration loader using figment.
//!
//! Layered configuration, later sources overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. The TOML configuration file (`braze.toml` by default)
//! 3. Environment variables (`BRAZE_*`, `__` as section separator —
//!    `BRAZE_LOGGING__LEVEL=debug` maps to `logging.level`)
//!
//! # Example
//!
//! ```rust,ignore
//! use braze_runtime::config::ConfigLoader;
//!
//! // Search the current directory for braze.toml
//! let config = ConfigLoader::new().load()?;
//!
//! // Load a specific file without env overrides
//! let config = ConfigLoader::new()
//!     .file("config/braze.toml")
//!     .without_env()
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use thiserror::Error;
use tracing::debug;

use super::schema::BrazeConfig;

/// Default configuration file name.
const CONFIG_FILE: &str = "braze.toml";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Figment failed to merge or deserialize the configuration.
    #[error("failed to load configuration: {0}")]
    Extraction(#[from] figment::Error),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Builder-style configuration loader.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
    env: bool,
}

impl ConfigLoader {
    /// A loader that searches the current directory for `braze.toml` and
    /// applies `BRAZE_*` environment overrides.
    pub fn new() -> Self {
        Self {
            file: None,
            search_paths: vec![PathBuf::from(".")],
            env: true,
        }
    }

    /// Loads this specific file instead of searching.
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Adds a directory to search for `braze.toml`.
    pub fn search_path(mut self, path: impl AsRef<Path>) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Enables environment variable overrides (enabled by default).
    pub fn with_env(mut self) -> Self {
        self.env = true;
        self
    }

    /// Disables environment variable overrides.
    pub fn without_env(mut self) -> Self {
        self.env = false;
        self
    }

    /// Resolves the configuration file to load, if any exists.
    fn resolve_file(&self) -> Option<PathBuf> {
        if let Some(file) = &self.file {
            return Some(file.clone());
        }
        self.search_paths
            .iter()
            .map(|dir| dir.join(CONFIG_FILE))
            .find(|candidate| candidate.is_file())
    }

    /// Loads and merges all configuration sources.
    pub fn load(self) -> ConfigResult<BrazeConfig> {
        let mut figment = Figment::from(Serialized::defaults(BrazeConfig::default()));

        match self.resolve_file() {
            Some(path) => {
                debug!(path = %path.display(), "Loading configuration file");
                figment = figment.merge(Toml::file(path));
            }
            None => {
                debug!("No configuration file found, using defaults");
            }
        }

        if self.env {
            figment = figment.merge(Env::prefixed("BRAZE_").split("__"));
        }

        Ok(figment.extract()?)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_when_nothing_found() {
        let tmp = tempdir().unwrap();
        let config = ConfigLoader::new()
            .file(tmp.path().join("absent.toml"))
            .without_env()
            .load()
            .unwrap();
        assert_eq!(config.logging.level, "info");
        assert!(config.plugins.system.is_empty());
    }

    #[test]
    fn file_overrides_defaults() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        fs::write(
            &path,
            "[logging]\nlevel = \"debug\"\n\n[plugins]\nuser = [\"demo\"]\n",
        )
        .unwrap();

        let config = ConfigLoader::new()
            .file(&path)
            .without_env()
            .load()
            .unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.plugins.user, vec!["demo"]);
        // Untouched sections keep their defaults.
        assert_eq!(config.gateway.base_url, "ws://127.0.0.1:3001");
    }

    #[test]
    fn search_path_finds_the_file() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE), "[identity]\nbot_uin = 7\n").unwrap();

        let config = ConfigLoader::new()
            .search_path(tmp.path())
            .without_env()
            .load()
            .unwrap();
        assert_eq!(config.identity.bot_uin, 7);
    }
}
