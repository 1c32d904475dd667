//! NGSI-LD (normalized form) encoding of entities.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde_json::{json, Map, Value};

use super::id::{EntityId, EntityType};
use super::layer::{GeospatialLayer, LayerKind};
use super::prediction::{PredictionEntity, ValueRange};
use super::EntityError;
use crate::coord::GeoPolygon;

/// Core context attached to every payload.
pub const NGSI_LD_CONTEXT: &str = "https://uri.etsi.org/ngsi-ld/v1/ngsi-ld-core-context.jsonld";

/// Any entity the pipeline handles.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Layer(GeospatialLayer),
    Prediction(PredictionEntity),
}

impl From<GeospatialLayer> for Entity {
    fn from(layer: GeospatialLayer) -> Self {
        Entity::Layer(layer)
    }
}

impl From<PredictionEntity> for Entity {
    fn from(prediction: PredictionEntity) -> Self {
        Entity::Prediction(prediction)
    }
}

fn property(value: impl Into<Value>) -> Value {
    json!({ "type": "Property", "value": value.into() })
}

fn polygon_property(polygon: &GeoPolygon) -> Value {
    json!({ "type": "GeoProperty", "value": polygon.to_geojson() })
}

impl Entity {
    pub fn id(&self) -> &EntityId {
        match self {
            Entity::Layer(l) => &l.id,
            Entity::Prediction(p) => &p.id,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Layer(_) => EntityType::GeoSpatialLayer,
            Entity::Prediction(_) => EntityType::UhiHeatMap,
        }
    }

    pub fn file_path(&self) -> &std::path::Path {
        match self {
            Entity::Layer(l) => &l.file_path,
            Entity::Prediction(p) => &p.file_path,
        }
    }

    pub fn publish(&self) -> bool {
        match self {
            Entity::Layer(l) => l.publish,
            Entity::Prediction(p) => p.publish,
        }
    }

    /// Creation stamp: `dateCreated` of a layer, `dateGenerated` of a prediction.
    pub fn timestamp(&self) -> &str {
        match self {
            Entity::Layer(l) => &l.date_created,
            Entity::Prediction(p) => &p.date_generated,
        }
    }

    pub fn set_timestamp(&mut self, stamp: impl Into<String>) {
        match self {
            Entity::Layer(l) => l.date_created = stamp.into(),
            Entity::Prediction(p) => p.date_generated = stamp.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Entity::Layer(l) => &l.name,
            Entity::Prediction(p) => &p.name,
        }
    }

    /// Attribute map without `id`, `type` or `@context`.
    pub fn attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        match self {
            Entity::Layer(l) => {
                attrs.insert("name".into(), property(l.name.clone()));
                attrs.insert("layerType".into(), property(l.kind.tag()));
                attrs.insert("spectralRange".into(), property(l.spectral_range.clone()));
                attrs.insert("dateCreated".into(), property(l.date_created.clone()));
                attrs.insert(
                    "resolution".into(),
                    json!({ "type": "Property", "value": l.resolution_cm, "unitCode": "CMT" }),
                );
                attrs.insert("filePath".into(), property(l.file_path.to_string_lossy().into_owned()));
                attrs.insert("geoserverLayer".into(), property(l.map_layer.clone()));
                attrs.insert("publishToGeoserver".into(), property(l.publish));
                if let Some(polygon) = &l.bounding_polygon {
                    attrs.insert("boundingBox".into(), polygon_property(polygon));
                }
            }
            Entity::Prediction(p) => {
                attrs.insert("name".into(), property(p.name.clone()));
                attrs.insert("modelVersion".into(), property(p.model_version.clone()));
                attrs.insert("dateGenerated".into(), property(p.date_generated.clone()));
                attrs.insert(
                    "inputLayers".into(),
                    property(
                        p.input_layers
                            .iter()
                            .map(|id| Value::String(id.to_string()))
                            .collect::<Vec<_>>(),
                    ),
                );
                attrs.insert("filePath".into(), property(p.file_path.to_string_lossy().into_owned()));
                attrs.insert("geoserverLayer".into(), property(p.map_layer.clone()));
                attrs.insert("publishToGeoserver".into(), property(p.publish));
                attrs.insert(
                    "valueRange".into(),
                    property(json!({
                        "min": p.value_range.min,
                        "max": p.value_range.max,
                        "description": p.value_range.description,
                    })),
                );
                if let Some(polygon) = &p.bounding_polygon {
                    attrs.insert("boundingBox".into(), polygon_property(polygon));
                }
            }
        }
        attrs
    }

    /// Full creation payload including `@context`.
    pub fn to_ngsi_ld(&self) -> Value {
        let mut body = Map::new();
        body.insert("id".into(), Value::String(self.id().to_string()));
        body.insert("type".into(), Value::String(self.entity_type().to_string()));
        body.extend(self.attributes());
        body.insert("@context".into(), json!([NGSI_LD_CONTEXT]));
        Value::Object(body)
    }

    /// Names of attributes whose values differ from `previous`.
    ///
    /// Every attribute counts as changed when there is no previous version.
    pub fn changed_attributes(&self, previous: Option<&Entity>) -> BTreeSet<String> {
        let current = self.attributes();
        let Some(previous) = previous else {
            return current.keys().cloned().collect();
        };
        let before = previous.attributes();
        let mut changed: BTreeSet<String> = current
            .iter()
            .filter(|(k, v)| before.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        changed.extend(before.keys().filter(|k| !current.contains_key(*k)).cloned());
        changed
    }

    /// True if both entities carry identical attributes.
    pub fn same_content(&self, other: &Entity) -> bool {
        self.id() == other.id() && self.attributes() == other.attributes()
    }

    /// Decodes a normalized NGSI-LD entity.
    pub fn from_ngsi_ld(value: &Value) -> Result<Self, EntityError> {
        let raw_id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| EntityError::InvalidId(String::new()))?;
        let id = EntityId::parse(raw_id)?;
        let raw_type = value.get("type").and_then(Value::as_str).unwrap_or_default();
        let attrs = Attributes { id: &id, value };

        match raw_type.parse::<EntityType>()? {
            EntityType::GeoSpatialLayer => {
                let kind_tag = attrs.required_str("layerType")?;
                let kind = kind_tag.parse::<LayerKind>()?;
                Ok(Entity::Layer(GeospatialLayer {
                    kind,
                    name: attrs.optional_str("name").unwrap_or_else(|| kind.tag().to_string()),
                    spectral_range: attrs
                        .optional_str("spectralRange")
                        .unwrap_or_else(|| kind.spectral_range().to_string()),
                    date_created: attrs.optional_str("dateCreated").unwrap_or_default(),
                    resolution_cm: attrs
                        .value("resolution")
                        .and_then(Value::as_u64)
                        .map(|v| v as u32)
                        .unwrap_or(0),
                    file_path: PathBuf::from(attrs.required_str("filePath")?),
                    map_layer: attrs.optional_str("geoserverLayer").unwrap_or_default(),
                    publish: attrs.bool("publishToGeoserver")?,
                    bounding_polygon: attrs.polygon("boundingBox")?,
                    id,
                }))
            }
            EntityType::UhiHeatMap => {
                let input_layers = match attrs.value("inputLayers") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|item| {
                            item.as_str()
                                .ok_or_else(|| attrs.malformed("inputLayers", "non-string entry"))
                                .and_then(EntityId::parse)
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    Some(Value::String(single)) => vec![EntityId::parse(single)?],
                    Some(_) => return Err(attrs.malformed("inputLayers", "expected a list")),
                };
                let value_range = match attrs.value("valueRange") {
                    Some(v) => serde_json::from_value::<ValueRange>(v.clone())
                        .map_err(|e| attrs.malformed("valueRange", e.to_string()))?,
                    None => ValueRange::default(),
                };
                Ok(Entity::Prediction(PredictionEntity {
                    name: attrs.optional_str("name").unwrap_or_default(),
                    model_version: attrs.optional_str("modelVersion").unwrap_or_default(),
                    date_generated: attrs.optional_str("dateGenerated").unwrap_or_default(),
                    input_layers,
                    file_path: PathBuf::from(attrs.required_str("filePath")?),
                    map_layer: attrs.optional_str("geoserverLayer").unwrap_or_default(),
                    publish: attrs.bool("publishToGeoserver")?,
                    value_range,
                    bounding_polygon: attrs.polygon("boundingBox")?,
                    id,
                }))
            }
        }
    }
}

/// Accessors over the attributes of one raw entity.
struct Attributes<'a> {
    id: &'a EntityId,
    value: &'a Value,
}

impl Attributes<'_> {
    /// The `value` of a Property; bare values are accepted too.
    fn value(&self, name: &str) -> Option<&Value> {
        let attr = self.value.get(name)?;
        match attr {
            Value::Object(obj) if obj.contains_key("value") => obj.get("value"),
            other => Some(other),
        }
    }

    fn optional_str(&self, name: &str) -> Option<String> {
        self.value(name).and_then(Value::as_str).map(str::to_string)
    }

    fn required_str(&self, name: &'static str) -> Result<String, EntityError> {
        match self.value(name) {
            None | Some(Value::Null) => Err(EntityError::MissingAttribute {
                id: self.id.to_string(),
                attribute: name,
            }),
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(_) => Err(self.malformed(name, "expected a non-empty string")),
        }
    }

    /// Missing means false.
    fn bool(&self, name: &'static str) -> Result<bool, EntityError> {
        match self.value(name) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(false),
            Some(_) => Err(self.malformed(name, "expected a boolean")),
        }
    }

    fn polygon(&self, name: &'static str) -> Result<Option<GeoPolygon>, EntityError> {
        match self.value(name) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => GeoPolygon::from_geojson(v)
                .map(Some)
                .map_err(|e| self.malformed(name, e.to_string())),
        }
    }

    fn malformed(&self, attribute: &'static str, reason: impl Into<String>) -> EntityError {
        EntityError::MalformedAttribute {
            id: self.id.to_string(),
            attribute,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{Bounds, GeoPolygon};
    use crate::entity::Area;

    fn area() -> Area {
        Area::new("brussels", "2024")
    }

    fn ndvi() -> Entity {
        let polygon = GeoPolygon::rectangle(&Bounds::new(4.2, 50.7, 4.5, 50.9)).unwrap();
        GeospatialLayer::new(LayerKind::Ndvi, &area(), "/data/processed/ndvi_brussels_2024.tif", 40, "uhi")
            .with_bounding_polygon(Some(polygon))
            .into()
    }

    #[test]
    fn test_layer_payload_shape() {
        let payload = ndvi().to_ngsi_ld();
        assert_eq!(payload["id"], "urn:ngsi-ld:GeoSpatialLayer:NDVI:brussels:2024");
        assert_eq!(payload["type"], "GeoSpatialLayer");
        assert_eq!(payload["layerType"]["value"], "NDVI");
        assert_eq!(payload["resolution"]["unitCode"], "CMT");
        assert_eq!(payload["publishToGeoserver"]["value"], true);
        assert_eq!(payload["boundingBox"]["type"], "GeoProperty");
        assert_eq!(payload["boundingBox"]["value"]["type"], "Polygon");
        assert_eq!(payload["@context"][0], NGSI_LD_CONTEXT);
    }

    #[test]
    fn test_layer_decodes_to_same_entity() {
        let entity = ndvi();
        let decoded = Entity::from_ngsi_ld(&entity.to_ngsi_ld()).unwrap();
        assert_eq!(decoded, entity);
        assert!(decoded.same_content(&entity));
    }

    #[test]
    fn test_prediction_payload() {
        let prediction = PredictionEntity::new(
            &area(),
            "/data/processed/uhi_prediction_brussels_2024.tif",
            "placeholder_v1",
            vec![EntityId::for_layer("NDVI", &area())],
            "uhi",
        );
        let entity = Entity::from(prediction);
        let payload = entity.to_ngsi_ld();
        assert_eq!(payload["type"], "UHIHeatMap");
        assert_eq!(payload["name"]["value"], "UHI Prediction Brussels 2024");
        assert_eq!(payload["geoserverLayer"]["value"], "uhi:uhi_prediction");
        assert_eq!(payload["valueRange"]["value"]["description"], "0=cool, 1=hot");
        assert_eq!(Entity::from_ngsi_ld(&payload).unwrap(), entity);
    }

    #[test]
    fn test_missing_file_path_rejected() {
        let mut payload = ndvi().to_ngsi_ld();
        payload.as_object_mut().unwrap().remove("filePath");
        assert!(matches!(
            Entity::from_ngsi_ld(&payload),
            Err(EntityError::MissingAttribute { attribute: "filePath", .. })
        ));
    }

    #[test]
    fn test_publish_flag_defaults_false() {
        let mut payload = ndvi().to_ngsi_ld();
        payload.as_object_mut().unwrap().remove("publishToGeoserver");
        assert!(!Entity::from_ngsi_ld(&payload).unwrap().publish());
    }

    #[test]
    fn test_changed_attributes() {
        let before = ndvi();
        assert!(before.changed_attributes(Some(&before)).is_empty());
        assert!(before.changed_attributes(None).contains("filePath"));

        let Entity::Layer(mut layer) = before.clone() else { unreachable!() };
        layer.publish = false;
        let after = Entity::Layer(layer);
        let changed = after.changed_attributes(Some(&before));
        assert_eq!(changed.into_iter().collect::<Vec<_>>(), vec!["publishToGeoserver"]);
        assert!(!after.same_content(&before));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let payload = json!({"id": "urn:ngsi-ld:Building:1", "type": "Building"});
        assert!(matches!(
            Entity::from_ngsi_ld(&payload),
            Err(EntityError::UnknownType(_))
        ));
    }
}
