//! Raster tile codec: GeoTIFF reading, windowed transforms, 8-bit
//! quantization, tiled output with overviews.
//!
//! # Example
//!
//! ```ignore
//! use heatlayer::raster::{run_transform, InputBand, NormalizedDifference, Tiling, TransformRequest};
//!
//! let ndvi = NormalizedDifference::ndvi();
//! run_transform(TransformRequest {
//!     inputs: vec![InputBand::raw("nir.tif", 0), InputBand::raw("rgb.tif", 0)],
//!     output: "ndvi.tif".into(),
//!     transform: &ndvi,
//!     tiling: Tiling::default(),
//!     metadata: vec![],
//! })?;
//! ```

mod error;
#[doc(hidden)]
pub mod fixture;
mod overview;
mod preview;
mod quantize;
mod reader;
mod tiff;
mod transform;
mod window;
mod writer;

pub use error::RasterError;
pub use overview::{average_valid, overview_factors};
pub use preview::render_preview;
pub use quantize::{ValueDomain, MAX_CODE, NODATA};
pub use reader::{LevelInfo, RasterReader};
pub use tiff::{parse_gdal_metadata, GeoReference};
pub(crate) use tiff::xml_escape;
pub use transform::{
    check_coregistered, run_transform, HeatModel, HeatRisk, InputBand, NormalizedDifference,
    PixelTransform, PlaceholderModel, SampleDecoding, Tiling, TransformRequest, TransformSummary,
};
pub use window::{Window, WindowGrid};
pub use writer::{partial_path, CogOptions, CogWriter};

use tracing::warn;

use crate::coord::{self, GeoPolygon};

/// WGS84 footprint of a raster, densified along each edge.
///
/// Returns `None` (with a warning) when the raster has no georeferencing
/// or uses a coordinate system that cannot be transformed.
pub fn footprint(reader: &RasterReader) -> Option<GeoPolygon> {
    let Some(geo) = reader.geo_reference() else {
        warn!(path = %reader.path().display(), "Raster has no georeferencing; no bounding polygon");
        return None;
    };
    let bounds = geo.bounds(reader.width(), reader.height());
    let crs = match geo.epsg() {
        Some(code) => match coord::Crs::from_epsg(code) {
            Ok(crs) => crs,
            Err(e) => {
                warn!(path = %reader.path().display(), error = %e, "No bounding polygon");
                return None;
            }
        },
        None => {
            warn!(path = %reader.path().display(), "Raster CRS has no EPSG code; no bounding polygon");
            return None;
        }
    };
    match coord::footprint_polygon(crs, &bounds) {
        Ok(polygon) => Some(polygon),
        Err(e) => {
            warn!(path = %reader.path().display(), error = %e, "Bounding polygon transform failed");
            None
        }
    }
}
