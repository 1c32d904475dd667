//! Prediction (heat map) records.

use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::id::{Area, EntityId};
use crate::coord::GeoPolygon;

/// Published layer name of heat-risk predictions.
pub const HEAT_MAP_LAYER: &str = "uhi_prediction";

/// Value range declared on a prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
    pub description: String,
}

impl Default for ValueRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            description: "0=cool, 1=hot".to_string(),
        }
    }
}

/// Heat-risk prediction raster known to the entity store.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionEntity {
    pub id: EntityId,
    pub name: String,
    pub model_version: String,
    pub date_generated: String,
    /// Layers the prediction was computed from
    pub input_layers: Vec<EntityId>,
    pub file_path: PathBuf,
    pub map_layer: String,
    pub publish: bool,
    pub value_range: ValueRange,
    pub bounding_polygon: Option<GeoPolygon>,
}

impl PredictionEntity {
    pub fn new(
        area: &Area,
        file_path: impl Into<PathBuf>,
        model_version: impl Into<String>,
        input_layers: Vec<EntityId>,
        workspace: &str,
    ) -> Self {
        Self {
            id: EntityId::for_heat_map(area),
            name: format!("UHI Prediction {} {}", area.display_name(), area.vintage),
            model_version: model_version.into(),
            date_generated: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            input_layers,
            file_path: file_path.into(),
            map_layer: format!("{}:{}", workspace, HEAT_MAP_LAYER),
            publish: true,
            value_range: ValueRange::default(),
            bounding_polygon: None,
        }
    }

    pub fn with_bounding_polygon(mut self, polygon: Option<GeoPolygon>) -> Self {
        self.bounding_polygon = polygon;
        self
    }
}
