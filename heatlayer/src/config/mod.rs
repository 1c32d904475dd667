//! Configuration for the pipeline services.
//!
//! One INI file with a section per concern; every key has a default, so an
//! empty or missing file is valid. `HEATLAYER__<SECTION>__<KEY>` environment
//! variables override file values before validation.
//!
//! # Example
//!
//! ```
//! use heatlayer::config::ConfigFile;
//!
//! let config = ConfigFile::default();
//! assert_eq!(config.raster.block_size, 512);
//! ```

mod defaults;
mod env;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::*;
pub use env::{ENV_CONFIG_PATH, ENV_OVERRIDE_PREFIX};
pub use file::{config_directory, config_file_path, resolve_config_path, ConfigFileError};
pub use parser::KNOWN_MODELS;
pub use settings::*;
