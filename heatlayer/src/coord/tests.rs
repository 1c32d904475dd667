//! Tests for coordinate conversion

use super::*;
use serde_json::json;

#[test]
fn test_epsg_lookup() {
    assert_eq!(Crs::from_epsg(31370), Ok(Crs::BelgianLambert72));
    assert_eq!(Crs::from_epsg(4326), Ok(Crs::Wgs84));
    assert_eq!(Crs::from_epsg(3857).map(Crs::epsg), Ok(3857));
    assert_eq!(Crs::from_epsg(32631), Err(CoordError::UnsupportedCrs(32631)));
    assert_eq!(Crs::from_epsg(0), Err(CoordError::UnsupportedCrs(0)));
}

#[test]
fn test_epsg_round_trip() {
    for crs in [Crs::Wgs84, Crs::WebMercator, Crs::BelgianLambert72] {
        assert_eq!(Crs::from_epsg(crs.epsg()), Ok(crs));
    }
    assert_eq!(Crs::BelgianLambert72.to_string(), "EPSG:31370");
}

#[test]
fn test_lambert72_brussels_centre() {
    // Grand-Place area in Lambert 72
    let (lon, lat) = to_wgs84(Crs::BelgianLambert72, 148_600.0, 170_800.0).unwrap();
    assert!((lon - 4.3489).abs() < 0.001, "lon was {}", lon);
    assert!((lat - 50.8476).abs() < 0.001, "lat was {}", lat);
}

#[test]
fn test_lambert72_datum_shift_applied() {
    // On the central meridian the projection alone gives ~4.3675;
    // BD72 -> WGS84 moves it about 90 m east.
    let (lon, _) = to_wgs84(Crs::BelgianLambert72, 150_000.0, 170_000.0).unwrap();
    assert!((lon - 4.36875).abs() < 0.0005, "lon was {}", lon);
}

#[test]
fn test_web_mercator_origin_and_quarter_turn() {
    let (lon, lat) = to_wgs84(Crs::WebMercator, 0.0, 0.0).unwrap();
    assert!(lon.abs() < 1e-9 && lat.abs() < 1e-9);
    let (lon, _) = to_wgs84(Crs::WebMercator, 10_018_754.171394622, 0.0).unwrap();
    assert!((lon - 90.0).abs() < 1e-6, "lon was {}", lon);
}

#[test]
fn test_transform_bounds_wgs84_is_identity() {
    let b = Bounds::new(4.2, 50.7, 4.5, 50.9);
    assert_eq!(transform_bounds(Crs::Wgs84, &b).unwrap(), b);
}

#[test]
fn test_prepared_transform_matches_single_point() {
    let projection = ToWgs84::new(Crs::BelgianLambert72).unwrap();
    assert_eq!(
        projection.apply(148_600.0, 170_800.0).unwrap(),
        to_wgs84(Crs::BelgianLambert72, 148_600.0, 170_800.0).unwrap()
    );
    assert!(Crs::Wgs84.proj_definition().is_none());
}

#[test]
fn test_footprint_rectangle_shape() {
    let poly = footprint_polygon(
        Crs::BelgianLambert72,
        &Bounds::new(140_000.0, 160_000.0, 160_000.0, 180_000.0),
    )
    .unwrap();
    let ring = poly.ring();
    assert_eq!(ring.len(), 5);
    assert_eq!(ring[0], ring[4]);
    let env = poly.envelope();
    assert!(env.min_x > 4.1 && env.max_x < 4.7);
    assert!(env.min_y > 50.6 && env.max_y < 51.1);
}

#[test]
fn test_polygon_closes_ring() {
    let poly = GeoPolygon::from_ring(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]).unwrap();
    assert_eq!(poly.ring().len(), 4);
}

#[test]
fn test_polygon_rejects_bad_latitude() {
    let err = GeoPolygon::from_ring(vec![[0.0, 0.0], [1.0, 95.0], [1.0, 1.0]]).unwrap_err();
    assert_eq!(err, CoordError::InvalidLatitude(95.0));
}

#[test]
fn test_geojson_parse() {
    let value = json!({
        "type": "Polygon",
        "coordinates": [[[4.0, 50.0], [5.0, 50.0], [5.0, 51.0], [4.0, 51.0], [4.0, 50.0]]]
    });
    let poly = GeoPolygon::from_geojson(&value).unwrap();
    assert_eq!(poly.to_geojson(), value);
    assert!(GeoPolygon::from_geojson(&json!({"type": "Point", "coordinates": [0, 0]})).is_err());
}
