//! Geospatial layer records.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};

use super::id::{Area, EntityId};
use super::EntityError;
use crate::coord::GeoPolygon;

/// What a layer's raster contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    /// Raw visible-spectrum orthophoto
    Rgb,
    /// Raw near-infrared orthophoto
    Nir,
    /// Vegetation index derived from NIR and red
    Ndvi,
    /// Water index derived from green and NIR
    Ndwi,
}

impl LayerKind {
    pub const ALL: [LayerKind; 4] = [LayerKind::Rgb, LayerKind::Nir, LayerKind::Ndvi, LayerKind::Ndwi];

    /// Value of the `layerType` attribute.
    pub fn tag(self) -> &'static str {
        match self {
            LayerKind::Rgb => "RGB",
            LayerKind::Nir => "NIR",
            LayerKind::Ndvi => "NDVI",
            LayerKind::Ndwi => "NDWI",
        }
    }

    /// Value of the `spectralRange` attribute.
    pub fn spectral_range(self) -> &'static str {
        match self {
            LayerKind::Rgb => "RGB",
            LayerKind::Nir => "NIR",
            LayerKind::Ndvi | LayerKind::Ndwi => "computed",
        }
    }

    pub fn is_derived(self) -> bool {
        matches!(self, LayerKind::Ndvi | LayerKind::Ndwi)
    }

    /// Published layer name, lower-case tag.
    pub fn layer_name(self) -> String {
        self.tag().to_ascii_lowercase()
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for LayerKind {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LayerKind::ALL
            .into_iter()
            .find(|k| k.tag().eq_ignore_ascii_case(s))
            .ok_or_else(|| EntityError::UnknownLayerType(s.to_string()))
    }
}

/// One raster layer known to the entity store.
#[derive(Debug, Clone, PartialEq)]
pub struct GeospatialLayer {
    pub id: EntityId,
    pub kind: LayerKind,
    pub name: String,
    pub spectral_range: String,
    pub date_created: String,
    pub resolution_cm: u32,
    pub file_path: PathBuf,
    /// Qualified map layer, e.g. `uhi:ndvi`
    pub map_layer: String,
    pub publish: bool,
    pub bounding_polygon: Option<GeoPolygon>,
}

impl GeospatialLayer {
    /// New layer record stamped with the current time.
    ///
    /// Layers are published by default.
    pub fn new(
        kind: LayerKind,
        area: &Area,
        file_path: impl Into<PathBuf>,
        resolution_cm: u32,
        workspace: &str,
    ) -> Self {
        Self {
            id: EntityId::for_layer(kind.tag(), area),
            kind,
            name: format!("{} {} {}", kind.tag(), area.display_name(), area.vintage),
            spectral_range: kind.spectral_range().to_string(),
            date_created: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            resolution_cm,
            file_path: file_path.into(),
            map_layer: format!("{}:{}", workspace, kind.layer_name()),
            publish: true,
            bounding_polygon: None,
        }
    }

    pub fn with_bounding_polygon(mut self, polygon: Option<GeoPolygon>) -> Self {
        self.bounding_polygon = polygon;
        self
    }

    pub fn with_publish(mut self, publish: bool) -> Self {
        self.publish = publish;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_defaults() {
        let area = Area::new("brussels", "2024");
        let layer = GeospatialLayer::new(LayerKind::Ndvi, &area, "/data/processed/ndvi.tif", 40, "uhi");
        assert_eq!(layer.id.as_str(), "urn:ngsi-ld:GeoSpatialLayer:NDVI:brussels:2024");
        assert_eq!(layer.name, "NDVI Brussels 2024");
        assert_eq!(layer.spectral_range, "computed");
        assert_eq!(layer.map_layer, "uhi:ndvi");
        assert!(layer.publish);
        assert!(layer.date_created.ends_with('Z'));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("ndwi".parse::<LayerKind>().unwrap(), LayerKind::Ndwi);
        assert!(matches!(
            "SWIR".parse::<LayerKind>(),
            Err(EntityError::UnknownLayerType(_))
        ));
    }
}
