//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use std::path::PathBuf;
use std::time::Duration;

use crate::entity::{Area, EntityId, LayerKind};
use crate::publish::PathMap;
use crate::raster::Tiling;

/// Complete application configuration loaded from config.ini.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    /// HTTP surface and reconciliation
    pub service: ServiceSettings,
    /// NGSI-LD broker connection
    pub entity_store: EntityStoreSettings,
    /// GeoServer connection and workspace
    pub map_server: MapServerSettings,
    /// Area and vintage every entity id is derived from
    pub area: AreaSettings,
    /// Shared storage directories
    pub paths: PathSettings,
    /// Producer path prefix -> map server path prefix
    pub path_map: PathMap,
    /// Index stage inputs
    pub index: IndexSettings,
    /// Prediction stage inputs and model
    pub prediction: PredictionSettings,
    /// Output tiling
    pub raster: RasterSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// `[service]`
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Listen address, e.g. `0.0.0.0:8000`
    pub bind: String,
    /// URL the broker uses to reach this process
    pub self_url: String,
    /// Periodic sync-all interval; 0 disables
    pub reconcile_interval_secs: u64,
}

impl ServiceSettings {
    /// Notification endpoint registered with the broker.
    pub fn notify_endpoint(&self) -> String {
        format!("{}/react", self.self_url.trim_end_matches('/'))
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_secs > 0).then(|| Duration::from_secs(self.reconcile_interval_secs))
    }
}

/// `[entity_store]`
#[derive(Debug, Clone)]
pub struct EntityStoreSettings {
    pub url: String,
    pub timeout_secs: u64,
    /// Attempts for startup calls before giving up
    pub startup_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl EntityStoreSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// `[map_server]`
#[derive(Debug, Clone)]
pub struct MapServerSettings {
    pub url: String,
    pub user: String,
    pub password: String,
    pub workspace: String,
    pub timeout_secs: u64,
    pub ready_timeout_secs: u64,
}

/// `[area]`
#[derive(Debug, Clone)]
pub struct AreaSettings {
    pub name: String,
    pub vintage: String,
    /// Nominal ground resolution in centimetres
    pub resolution_cm: u32,
}

impl AreaSettings {
    pub fn area(&self) -> Area {
        Area::new(self.name.clone(), self.vintage.clone())
    }
}

/// `[paths]`
#[derive(Debug, Clone)]
pub struct PathSettings {
    pub raw: PathBuf,
    pub processed: PathBuf,
}

/// `[index]`
///
/// Band numbers are one-based, as in GIS tooling.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub rgb_entity: Option<EntityId>,
    pub nir_entity: Option<EntityId>,
    pub red_band: usize,
    pub green_band: usize,
    pub nir_band: usize,
}

impl IndexSettings {
    pub fn rgb_entity(&self, area: &Area) -> EntityId {
        self.rgb_entity
            .clone()
            .unwrap_or_else(|| EntityId::for_layer(LayerKind::Rgb.tag(), area))
    }

    pub fn nir_entity(&self, area: &Area) -> EntityId {
        self.nir_entity
            .clone()
            .unwrap_or_else(|| EntityId::for_layer(LayerKind::Nir.tag(), area))
    }
}

/// `[prediction]`
#[derive(Debug, Clone)]
pub struct PredictionSettings {
    pub ndvi_entity: Option<EntityId>,
    pub ndwi_entity: Option<EntityId>,
    pub model_version: String,
}

impl PredictionSettings {
    pub fn ndvi_entity(&self, area: &Area) -> EntityId {
        self.ndvi_entity
            .clone()
            .unwrap_or_else(|| EntityId::for_layer(LayerKind::Ndvi.tag(), area))
    }

    pub fn ndwi_entity(&self, area: &Area) -> EntityId {
        self.ndwi_entity
            .clone()
            .unwrap_or_else(|| EntityId::for_layer(LayerKind::Ndwi.tag(), area))
    }
}

/// `[raster]`
#[derive(Debug, Clone, Copy)]
pub struct RasterSettings {
    pub window_size: u32,
    pub block_size: u32,
    pub overview_levels: u8,
}

impl RasterSettings {
    pub fn tiling(&self) -> Tiling {
        Tiling {
            window_size: self.window_size,
            block_size: self.block_size,
            overview_levels: self.overview_levels,
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    /// Log file path; its parent directory is created on start
    pub file: PathBuf,
}
