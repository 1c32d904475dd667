//! Run failure taxonomy.

use serde::Serialize;
use thiserror::Error;

use crate::publish::{MapServerError, ResolveError};
use crate::raster::RasterError;
use crate::store::StoreError;

/// Stable classification of a [`PipelineError`], reported on the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Connectivity,
    NotFound,
    GeometryMismatch,
    Encoding,
    Io,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::NotFound => "not_found",
            ErrorKind::GeometryMismatch => "geometry_mismatch",
            ErrorKind::Encoding => "encoding",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Why a stage run failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// Bad path mapping, entity id, band number or tiling
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Entity store or map server unreachable
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Referenced entity or file missing
    #[error("not found: {0}")]
    NotFound(String),

    /// Inputs are not co-registered
    #[error("geometry mismatch: {0}")]
    GeometryMismatch(String),

    /// A value could not be quantized
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Unreadable or unwritable file
    #[error("I/O error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Configuration(_) => ErrorKind::Configuration,
            PipelineError::Connectivity(_) => ErrorKind::Connectivity,
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::GeometryMismatch(_) => ErrorKind::GeometryMismatch,
            PipelineError::Encoding(_) => ErrorKind::Encoding,
            PipelineError::Io(_) => ErrorKind::Io,
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Worth retrying at the edge.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Connectivity
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => PipelineError::NotFound(e.to_string()),
            StoreError::Connectivity { .. } => PipelineError::Connectivity(e.to_string()),
            StoreError::Rejected { .. } | StoreError::InvalidPayload(_) | StoreError::InvalidResponse { .. } => {
                PipelineError::Internal(e.to_string())
            }
        }
    }
}

impl From<RasterError> for PipelineError {
    fn from(e: RasterError) -> Self {
        match e {
            RasterError::NotFound(_) => PipelineError::NotFound(e.to_string()),
            RasterError::GeometryMismatch(_) => PipelineError::GeometryMismatch(e.to_string()),
            RasterError::Encoding { .. } => PipelineError::Encoding(e.to_string()),
            RasterError::BandOutOfRange { .. } | RasterError::InvalidTiling(_) => {
                PipelineError::Configuration(e.to_string())
            }
            RasterError::Io { .. } | RasterError::Malformed { .. } | RasterError::Unsupported { .. } => {
                PipelineError::Io(e.to_string())
            }
            RasterError::WindowOutOfBounds { .. } | RasterError::Arity { .. } => {
                PipelineError::Internal(e.to_string())
            }
        }
    }
}

impl From<ResolveError> for PipelineError {
    fn from(e: ResolveError) -> Self {
        PipelineError::Configuration(e.to_string())
    }
}

impl From<MapServerError> for PipelineError {
    fn from(e: MapServerError) -> Self {
        match e {
            MapServerError::Connectivity { .. } => PipelineError::Connectivity(e.to_string()),
            MapServerError::Rejected { .. } => PipelineError::Internal(e.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        PipelineError::Internal(format!("raster task failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use std::path::PathBuf;

    #[test]
    fn test_store_errors_keep_absent_and_unreachable_apart() {
        let id = EntityId::parse("urn:ngsi-ld:GeoSpatialLayer:RGB:brussels:2024").unwrap();
        assert_eq!(
            PipelineError::from(StoreError::NotFound(id)).kind(),
            ErrorKind::NotFound
        );
        let unreachable = PipelineError::from(StoreError::Connectivity {
            url: "http://orion:1026".into(),
            message: "timed out".into(),
        });
        assert_eq!(unreachable.kind(), ErrorKind::Connectivity);
        assert!(unreachable.is_transient());
    }

    #[test]
    fn test_raster_error_mapping() {
        assert_eq!(
            PipelineError::from(RasterError::NotFound(PathBuf::from("/x.tif"))).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            PipelineError::from(RasterError::GeometryMismatch("10x10 vs 20x20".into())).kind(),
            ErrorKind::GeometryMismatch
        );
        assert_eq!(
            PipelineError::from(RasterError::BandOutOfRange { band: 3, count: 1 }).kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_unmapped_path_is_configuration() {
        let id = EntityId::parse("urn:ngsi-ld:GeoSpatialLayer:RGB:brussels:2024").unwrap();
        let err = PipelineError::from(ResolveError::UnmappedPath {
            entity: id,
            path: "/tmp/x.tif".into(),
        });
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.kind().as_str(), "configuration");
    }
}
