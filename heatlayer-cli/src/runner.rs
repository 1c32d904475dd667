//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading and logging initialization so every
//! command handler starts from the same state.

use std::path::{Path, PathBuf};

use heatlayer::config::ConfigFile;
use heatlayer::logging::{init_logging, split_log_path, LoggingGuard};
use tracing::info;

use crate::error::CliError;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
}

impl CliRunner {
    /// Loads configuration (explicit path, `$HEATLAYER_CONFIG`, or the
    /// default) and starts logging to the configured file, plus stdout
    /// for the long-running commands.
    pub fn new(config_path: Option<&Path>, stdout: bool) -> Result<Self, CliError> {
        let config = ConfigFile::load(config_path)?;

        let (log_dir, log_file) = split_log_path(&config.logging.file);
        let logging_guard = init_logging(log_dir, log_file, stdout)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("heatlayer v{}", heatlayer::VERSION);
        info!(command, log_file = %self.config.logging.file.display(), "CLI command started");
    }

    /// Multi-threaded runtime for async commands.
    pub fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(CliError::Runtime)
    }
}

/// Output path with the parent directory created.
pub fn prepare_output(path: &Path) -> Result<PathBuf, CliError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            CliError::Config(format!("cannot create {}: {}", parent.display(), e))
        })?;
    }
    Ok(path.to_path_buf())
}
