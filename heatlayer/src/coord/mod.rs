//! Coordinate conversion module
//!
//! Transforms raster extents into WGS84 footprints for entity
//! bounding boxes.

mod projection;
mod types;

pub use projection::ToWgs84;
pub use types::{Bounds, CoordError, Crs, GeoPolygon, MAX_LAT, MAX_LON, MIN_LAT, MIN_LON};

/// Points sampled along each edge when transforming an extent.
pub const DENSIFY_POINTS: usize = 21;

/// Converts a point in `crs` to WGS84 (longitude, latitude).
pub fn to_wgs84(crs: Crs, x: f64, y: f64) -> Result<(f64, f64), CoordError> {
    ToWgs84::new(crs)?.apply(x, y)
}

/// Transforms an extent to WGS84, sampling every edge so curved
/// projected edges are enclosed.
pub fn transform_bounds(crs: Crs, bounds: &Bounds) -> Result<Bounds, CoordError> {
    let projection = ToWgs84::new(crs)?;
    let Bounds {
        min_x: l,
        min_y: b,
        max_x: r,
        max_y: t,
    } = *bounds;
    let edges = [((l, b), (r, b)), ((r, b), (r, t)), ((r, t), (l, t)), ((l, t), (l, b))];
    let steps = (DENSIFY_POINTS - 1) as f64;
    let points = edges
        .iter()
        .flat_map(|&((x0, y0), (x1, y1))| {
            (0..DENSIFY_POINTS).map(move |i| {
                let f = i as f64 / steps;
                (x0 + (x1 - x0) * f, y0 + (y1 - y0) * f)
            })
        })
        .map(|(x, y)| projection.apply(x, y))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Bounds::enclosing(points).unwrap_or(*bounds))
}

/// WGS84 rectangle enclosing a raster extent given in `crs`.
pub fn footprint_polygon(crs: Crs, bounds: &Bounds) -> Result<GeoPolygon, CoordError> {
    GeoPolygon::rectangle(&transform_bounds(crs, bounds)?)
}

#[cfg(test)]
mod tests;
