//! heatlayer - event-driven raster pipeline for urban heat-island mapping.
//!
//! Orthophotos are turned into vegetation and water indices, the indices
//! into a heat-risk prediction, and every flagged layer is published to a
//! map server. Stages never call each other: each one registers a
//! subscription with an NGSI-LD entity store and reacts to the entities the
//! previous stage writes.
//!
//! # High-Level API
//!
//! The [`service`] module assembles a stage and serves it:
//!
//! ```ignore
//! use heatlayer::config::ConfigFile;
//! use heatlayer::service::{run_service, Role};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = ConfigFile::load(None)?;
//! run_service(Role::Index, config, CancellationToken::new()).await?;
//! ```

pub mod config;
pub mod coord;
pub mod entity;
pub mod logging;
pub mod publish;
pub mod raster;
pub mod service;
pub mod stage;
pub mod store;
pub mod subscription;

/// Version of the heatlayer library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
