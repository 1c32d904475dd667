//! CLI command implementations.
//!
//! # Command Modules
//!
//! - [`compute`] - Offline NDVI/NDWI and heat-risk computation
//! - [`config`] - Configuration management (init, show, path)
//! - [`preview`] - PNG quicklook of an encoded layer
//! - [`serve`] - Stage services and one-off runs

pub mod compute;
pub mod config;
pub mod preview;
pub mod serve;
