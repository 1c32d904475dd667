//! Configuration file handling for ~/.heatlayer/config.ini.
//!
//! Loads and saves user configuration with sensible defaults.
//! Settings structs live in [`super::settings`], constants in [`super::defaults`],
//! parsing in [`super::parser`], and serialization in [`super::writer`].

use ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::env::{apply_env_overrides, ENV_CONFIG_PATH};
pub use super::settings::*;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

impl ConfigFile {
    /// Load configuration from `path`, `$HEATLAYER_CONFIG`, or the default path,
    /// with `HEATLAYER__SECTION__KEY` environment overrides applied.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigFileError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(resolve_config_path);
        Self::load_with_env(&path, std::env::vars())
    }

    /// Load configuration from a specific path without environment overrides.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        Self::load_with_env(path, std::iter::empty())
    }

    /// Load from `path`, overlaying the given environment variables.
    pub fn load_with_env(
        path: &Path,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigFileError> {
        let mut ini = if path.exists() {
            Ini::load_from_file(path)?
        } else {
            Ini::new()
        };
        apply_env_overrides(&mut ini, vars);
        super::parser::parse_ini(&ini)
    }

    /// Renders the configuration as a commented INI document.
    pub fn to_ini_string(&self) -> String {
        super::writer::to_config_string(self)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        let content = self.to_ini_string();
        std::fs::write(path, content).map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Create the default config file at `path` if it doesn't exist.
    ///
    /// Returns true if a file was written.
    pub fn ensure_exists(path: &Path) -> Result<bool, ConfigFileError> {
        if path.exists() {
            return Ok(false);
        }
        Self::default().save_to(path)?;
        Ok(true)
    }
}

/// Get the path to the config directory (~/.heatlayer).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".heatlayer")
}

/// Get the path to the default config file (~/.heatlayer/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

/// `$HEATLAYER_CONFIG` if set, else the default path.
pub fn resolve_config_path() -> PathBuf {
    std::env::var_os(ENV_CONFIG_PATH)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(config_file_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::*;

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.ini");

        let config = ConfigFile::load_from(&config_path).unwrap();
        assert_eq!(config.entity_store.url, DEFAULT_ENTITY_STORE_URL);
        assert_eq!(config.map_server.workspace, DEFAULT_WORKSPACE);
    }

    #[test]
    fn test_save_then_load_preserves_values() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.ini");

        let mut config = ConfigFile::default();
        config.area.name = "antwerp".into();
        config.raster.window_size = 1024;
        config.service.reconcile_interval_secs = 0;
        config.save_to(&config_path).unwrap();

        let loaded = ConfigFile::load_from(&config_path).unwrap();
        assert_eq!(loaded.area.name, "antwerp");
        assert_eq!(loaded.raster.window_size, 1024);
        assert_eq!(loaded.service.reconcile_interval(), None);
        assert_eq!(loaded.path_map, config.path_map);
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.ini");
        std::fs::write(&config_path, "[entity_store]\nurl = http://from-file:1026\n").unwrap();

        let config = ConfigFile::load_with_env(
            &config_path,
            [(
                "HEATLAYER__ENTITY_STORE__URL".to_string(),
                "http://from-env:1026".to_string(),
            )],
        )
        .unwrap();
        assert_eq!(config.entity_store.url, "http://from-env:1026");
    }

    #[test]
    fn test_ensure_exists_writes_once() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.ini");
        assert!(ConfigFile::ensure_exists(&config_path).unwrap());
        assert!(!ConfigFile::ensure_exists(&config_path).unwrap());
    }
}
