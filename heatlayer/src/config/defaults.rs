//! Default values for all configuration settings.

use std::path::PathBuf;

use super::settings::*;
use crate::publish::PathMap;

pub const DEFAULT_BIND: &str = "0.0.0.0:8000";
pub const DEFAULT_SELF_URL: &str = "http://localhost:8000";
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 300;

pub const DEFAULT_ENTITY_STORE_URL: &str = "http://orion:1026";
pub const DEFAULT_ENTITY_STORE_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_STARTUP_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 3000;

pub const DEFAULT_MAP_SERVER_URL: &str = "http://geoserver:8080/geoserver";
pub const DEFAULT_MAP_SERVER_USER: &str = "admin";
pub const DEFAULT_MAP_SERVER_PASSWORD: &str = "geoserver";
pub const DEFAULT_WORKSPACE: &str = "uhi";
pub const DEFAULT_MAP_SERVER_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAP_SERVER_READY_TIMEOUT_SECS: u64 = 180;

pub const DEFAULT_AREA_NAME: &str = "brussels";
pub const DEFAULT_AREA_VINTAGE: &str = "2024";
pub const DEFAULT_RESOLUTION_CM: u32 = 40;

pub const DEFAULT_RAW_DIR: &str = "/data/raw";
pub const DEFAULT_PROCESSED_DIR: &str = "/data/processed";

/// RGB orthophoto band order: red, green, blue
pub const DEFAULT_RED_BAND: usize = 1;
pub const DEFAULT_GREEN_BAND: usize = 2;
pub const DEFAULT_NIR_BAND: usize = 1;

pub const DEFAULT_MODEL_VERSION: &str = "placeholder_v1";

pub const DEFAULT_WINDOW_SIZE: u32 = 2048;
pub const DEFAULT_BLOCK_SIZE: u32 = 512;
pub const DEFAULT_OVERVIEW_LEVELS: u8 = 5;

pub const DEFAULT_LOG_FILE: &str = "logs/heatlayer.log";

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            service: ServiceSettings {
                bind: DEFAULT_BIND.to_string(),
                self_url: DEFAULT_SELF_URL.to_string(),
                reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            },
            entity_store: EntityStoreSettings {
                url: DEFAULT_ENTITY_STORE_URL.to_string(),
                timeout_secs: DEFAULT_ENTITY_STORE_TIMEOUT_SECS,
                startup_retries: DEFAULT_STARTUP_RETRIES,
                retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            },
            map_server: MapServerSettings {
                url: DEFAULT_MAP_SERVER_URL.to_string(),
                user: DEFAULT_MAP_SERVER_USER.to_string(),
                password: DEFAULT_MAP_SERVER_PASSWORD.to_string(),
                workspace: DEFAULT_WORKSPACE.to_string(),
                timeout_secs: DEFAULT_MAP_SERVER_TIMEOUT_SECS,
                ready_timeout_secs: DEFAULT_MAP_SERVER_READY_TIMEOUT_SECS,
            },
            area: AreaSettings {
                name: DEFAULT_AREA_NAME.to_string(),
                vintage: DEFAULT_AREA_VINTAGE.to_string(),
                resolution_cm: DEFAULT_RESOLUTION_CM,
            },
            paths: PathSettings {
                raw: PathBuf::from(DEFAULT_RAW_DIR),
                processed: PathBuf::from(DEFAULT_PROCESSED_DIR),
            },
            path_map: PathMap::default(),
            index: IndexSettings {
                rgb_entity: None,
                nir_entity: None,
                red_band: DEFAULT_RED_BAND,
                green_band: DEFAULT_GREEN_BAND,
                nir_band: DEFAULT_NIR_BAND,
            },
            prediction: PredictionSettings {
                ndvi_entity: None,
                ndwi_entity: None,
                model_version: DEFAULT_MODEL_VERSION.to_string(),
            },
            raster: RasterSettings {
                window_size: DEFAULT_WINDOW_SIZE,
                block_size: DEFAULT_BLOCK_SIZE,
                overview_levels: DEFAULT_OVERVIEW_LEVELS,
            },
            logging: LoggingSettings {
                file: PathBuf::from(DEFAULT_LOG_FILE),
            },
        }
    }
}
