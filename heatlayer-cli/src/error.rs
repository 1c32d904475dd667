//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use heatlayer::config::ConfigFileError;
use heatlayer::raster::RasterError;
use heatlayer::service::ServiceError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Service failed to start or stopped with an error
    Service(ServiceError),
    /// A one-off run finished unsuccessfully
    RunFailed { stage: String, message: String },
    /// Offline raster tooling failed
    Raster(RasterError),
    /// Failed to start the async runtime
    Runtime(std::io::Error),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Service(ServiceError::Bind { .. }) = self {
            eprintln!();
            eprintln!("Another stage may already be listening on that address.");
            eprintln!("Set [service] bind or HEATLAYER__SERVICE__BIND to a free port.");
        }

        process::exit(match self {
            CliError::Config(_) => 2,
            _ => 1,
        })
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Service(e) => write!(f, "Service error: {}", e),
            CliError::RunFailed { stage, message } => {
                write!(f, "{} run failed: {}", stage, message)
            }
            CliError::Raster(e) => write!(f, "Raster error: {}", e),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Service(e) => Some(e),
            CliError::Raster(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<ServiceError> for CliError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Config(e) => CliError::Config(e.to_string()),
            other => CliError::Service(other),
        }
    }
}

impl From<RasterError> for CliError {
    fn from(e: RasterError) -> Self {
        CliError::Raster(e)
    }
}
