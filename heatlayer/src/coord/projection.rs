//! CRS definitions and point transforms to WGS84, backed by `proj4rs`.

use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use super::types::{CoordError, Crs};

/// Geographic WGS84, the target of every transform.
const WGS84_LONGLAT: &str = "+proj=longlat +ellps=WGS84 +datum=WGS84 +no_defs";

/// Spherical Web Mercator, without a datum so no shift is applied.
const WEB_MERCATOR: &str =
    "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs";

/// Belgian Lambert 72 on the International 1924 ellipsoid with the
/// seven-parameter BD72 -> WGS84 shift.
const BELGIAN_LAMBERT_72: &str = concat!(
    "+proj=lcc +lat_0=90 +lon_0=4.36748666666667 +lat_1=51.1666672333333 ",
    "+lat_2=49.8333339 +x_0=150000.013 +y_0=5400088.438 +ellps=intl ",
    "+towgs84=-106.8686,52.2978,-103.7239,0.3366,-0.457,1.8422,-1.2747 +units=m +no_defs"
);

impl Crs {
    /// proj string for the system, `None` for WGS84 itself.
    pub fn proj_definition(self) -> Option<&'static str> {
        match self {
            Crs::Wgs84 => None,
            Crs::WebMercator => Some(WEB_MERCATOR),
            Crs::BelgianLambert72 => Some(BELGIAN_LAMBERT_72),
        }
    }
}

fn parse(definition: &str) -> Result<Proj, CoordError> {
    Proj::from_proj_string(definition).map_err(|e| CoordError::Projection(e.to_string()))
}

/// A prepared `crs` -> WGS84 transform.
pub struct ToWgs84 {
    projections: Option<(Proj, Proj)>,
}

impl ToWgs84 {
    pub fn new(crs: Crs) -> Result<Self, CoordError> {
        let projections = match crs.proj_definition() {
            Some(definition) => Some((parse(definition)?, parse(WGS84_LONGLAT)?)),
            None => None,
        };
        Ok(Self { projections })
    }

    /// Converts one point to (longitude, latitude) degrees.
    pub fn apply(&self, x: f64, y: f64) -> Result<(f64, f64), CoordError> {
        let Some((source, target)) = &self.projections else {
            return Ok((x, y));
        };
        let mut point = (x, y, 0.0);
        transform(source, target, &mut point).map_err(|e| CoordError::Projection(e.to_string()))?;
        // geographic output is in radians
        Ok((point.0.to_degrees(), point.1.to_degrees()))
    }
}
