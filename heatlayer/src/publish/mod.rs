//! Map server publication.
//!
//! Publish-flagged entities are resolved into [`LayerTarget`]s and
//! upserted into a map server: one coverage store and one layer per
//! target, created when missing and updated in place otherwise.

mod geoserver;
mod memory;
mod resolver;

pub use geoserver::GeoServerClient;
pub use memory::MemoryMapServer;
pub use resolver::{LayerTarget, PathMap, PublicationResolver, ResolveError};

use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

/// Errors from map server operations.
#[derive(Debug, Error)]
pub enum MapServerError {
    /// Server unreachable, timed out, or failing with a server error
    #[error("map server unreachable at {url}: {message}")]
    Connectivity { url: String, message: String },

    /// Server refused the request
    #[error("map server rejected {operation}: HTTP {status}: {body}")]
    Rejected {
        operation: &'static str,
        status: u16,
        body: String,
    },
}

/// What happened to one store or layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Created,
    Updated,
    Unchanged,
}

/// Result of publishing one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub store: UpsertAction,
    pub layer: UpsertAction,
}

/// Operations the publication stage needs from a map server.
pub trait MapServer: Send + Sync {
    /// Creates the workspace unless it exists.
    fn ensure_workspace<'a>(&'a self, workspace: &'a str) -> BoxFuture<'a, Result<(), MapServerError>>;

    /// Creates or updates the store and layer for `target`.
    fn upsert_layer<'a>(&'a self, target: &'a LayerTarget) -> BoxFuture<'a, Result<PublishOutcome, MapServerError>>;
}
