//! Coordinate type definitions

use std::fmt;

use serde_json::{json, Value};

/// Valid latitude range
pub const MIN_LAT: f64 = -90.0;
pub const MAX_LAT: f64 = 90.0;

/// Valid longitude range
pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;

/// Coordinate reference systems the pipeline can transform to WGS84.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Crs {
    /// EPSG:4326, longitude/latitude degrees
    Wgs84,
    /// EPSG:3857, spherical Web Mercator metres
    WebMercator,
    /// EPSG:31370, Belgian Lambert 72 on the BD72 datum
    BelgianLambert72,
}

impl Crs {
    /// Looks up a GeoTIFF EPSG code (GeoKeys are 16-bit).
    pub fn from_epsg(code: u16) -> Result<Self, CoordError> {
        match code {
            4326 => Ok(Crs::Wgs84),
            3857 => Ok(Crs::WebMercator),
            31370 => Ok(Crs::BelgianLambert72),
            other => Err(CoordError::UnsupportedCrs(other)),
        }
    }

    pub fn epsg(self) -> u16 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
            Crs::BelgianLambert72 => 31370,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Axis-aligned extent in the units of some coordinate system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Smallest extent containing every point.
    pub fn enclosing(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        points.into_iter().fold(None, |acc, (x, y)| {
            Some(match acc {
                None => Bounds::new(x, y, x, y),
                Some(b) => Bounds::new(b.min_x.min(x), b.min_y.min(y), b.max_x.max(x), b.max_y.max(y)),
            })
        })
    }
}

/// Closed polygon ring in WGS84 longitude/latitude.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPolygon {
    ring: Vec<[f64; 2]>,
}

impl GeoPolygon {
    /// Builds a polygon from a ring, closing it if needed.
    pub fn from_ring(mut ring: Vec<[f64; 2]>) -> Result<Self, CoordError> {
        if ring.iter().flatten().any(|v| !v.is_finite()) {
            return Err(CoordError::InvalidPolygon("non-finite coordinate".into()));
        }
        for &[lon, lat] in &ring {
            if !(MIN_LON..=MAX_LON).contains(&lon) {
                return Err(CoordError::InvalidLongitude(lon));
            }
            if !(MIN_LAT..=MAX_LAT).contains(&lat) {
                return Err(CoordError::InvalidLatitude(lat));
            }
        }
        if ring.first() != ring.last() {
            if let Some(&first) = ring.first() {
                ring.push(first);
            }
        }
        if ring.len() < 4 {
            return Err(CoordError::InvalidPolygon(format!(
                "ring needs at least 4 positions, got {}",
                ring.len()
            )));
        }
        Ok(Self { ring })
    }

    /// Rectangle `[[l,b],[r,b],[r,t],[l,t],[l,b]]` over a lon/lat extent.
    pub fn rectangle(bounds: &Bounds) -> Result<Self, CoordError> {
        let Bounds {
            min_x: l,
            min_y: b,
            max_x: r,
            max_y: t,
        } = *bounds;
        Self::from_ring(vec![[l, b], [r, b], [r, t], [l, t], [l, b]])
    }

    pub fn ring(&self) -> &[[f64; 2]] {
        &self.ring
    }

    pub fn envelope(&self) -> Bounds {
        Bounds::enclosing(self.ring.iter().map(|p| (p[0], p[1])))
            .unwrap_or(Bounds::new(0.0, 0.0, 0.0, 0.0))
    }

    /// GeoJSON `Polygon` geometry.
    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [self.ring],
        })
    }

    /// Parses a GeoJSON `Polygon`, using its exterior ring.
    pub fn from_geojson(value: &Value) -> Result<Self, CoordError> {
        if value.get("type").and_then(Value::as_str) != Some("Polygon") {
            return Err(CoordError::InvalidPolygon("geometry is not a Polygon".into()));
        }
        let exterior = value
            .get("coordinates")
            .and_then(Value::as_array)
            .and_then(|rings| rings.first())
            .and_then(Value::as_array)
            .ok_or_else(|| CoordError::InvalidPolygon("missing exterior ring".into()))?;
        let ring = exterior
            .iter()
            .map(|pos| match pos.as_array().map(Vec::as_slice) {
                Some([x, y, ..]) => match (x.as_f64(), y.as_f64()) {
                    (Some(x), Some(y)) => Ok([x, y]),
                    _ => Err(CoordError::InvalidPolygon("non-numeric position".into())),
                },
                _ => Err(CoordError::InvalidPolygon("malformed position".into())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_ring(ring)
    }
}

/// Errors that can occur during coordinate conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordError {
    /// No transformation is known for this EPSG code
    UnsupportedCrs(u16),
    /// Latitude is outside -90..=90
    InvalidLatitude(f64),
    /// Longitude is outside -180..=180
    InvalidLongitude(f64),
    /// Polygon geometry is malformed
    InvalidPolygon(String),
    /// The projection library rejected a definition or a point
    Projection(String),
}

impl fmt::Display for CoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordError::UnsupportedCrs(code) => {
                write!(f, "Unsupported coordinate system: EPSG:{}", code)
            }
            CoordError::InvalidLatitude(lat) => {
                write!(
                    f,
                    "Invalid latitude: {} (must be between {} and {})",
                    lat, MIN_LAT, MAX_LAT
                )
            }
            CoordError::InvalidLongitude(lon) => {
                write!(
                    f,
                    "Invalid longitude: {} (must be between {} and {})",
                    lon, MIN_LON, MAX_LON
                )
            }
            CoordError::InvalidPolygon(reason) => write!(f, "Invalid polygon: {}", reason),
            CoordError::Projection(reason) => write!(f, "Projection failed: {}", reason),
        }
    }
}

impl std::error::Error for CoordError {}
