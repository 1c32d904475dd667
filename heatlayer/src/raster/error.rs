//! Error types for raster encoding and decoding.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::quantize::ValueDomain;
use super::window::Window;

/// Errors raised by the tile codec.
#[derive(Debug, Error)]
pub enum RasterError {
    /// Input raster does not exist
    #[error("raster not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Underlying file operation failed
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File is not a well-formed TIFF
    #[error("malformed TIFF {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    /// File uses a TIFF feature this codec does not read
    #[error("unsupported TIFF feature in {}: {feature}", path.display())]
    Unsupported { path: PathBuf, feature: String },

    /// Multi-input rasters differ in size or georeferencing
    #[error("inputs are not co-registered: {0}")]
    GeometryMismatch(String),

    /// Requested band does not exist
    #[error("band {band} out of range (raster has {count} bands)")]
    BandOutOfRange { band: usize, count: usize },

    /// Requested window exceeds the raster extent
    #[error("window {window} lies outside raster {width}x{height}")]
    WindowOutOfBounds {
        window: Window,
        width: u32,
        height: u32,
    },

    /// Window/block sizes do not form a valid tiling
    #[error("invalid tiling: {0}")]
    InvalidTiling(String),

    /// Transform was given the wrong number of inputs
    #[error("transform {name} expects {expected} inputs, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    /// A value could not be quantized (non-finite after clamping)
    #[error("cannot encode value {value} in domain {domain}")]
    Encoding { value: f32, domain: ValueDomain },
}

impl RasterError {
    /// Wraps an I/O error, promoting `NotFound` to [`RasterError::NotFound`].
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub(crate) fn malformed(path: &Path, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(path: &Path, feature: impl Into<String>) -> Self {
        Self::Unsupported {
            path: path.to_path_buf(),
            feature: feature.into(),
        }
    }
}
