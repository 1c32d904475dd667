//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! This module contains the `to_config_string()` function that produces
//! the commented INI representation written to `config.ini`.

use std::path::Path;

use super::settings::ConfigFile;
use crate::entity::EntityId;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let id = |v: &Option<EntityId>| v.as_ref().map(|id| id.to_string()).unwrap_or_default();
    let path_map: String = config
        .path_map
        .entries()
        .map(|(local, remote)| {
            let label = local
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "root".to_string());
            format!("{} = {} => {}\n", label, path_to_string(local), remote)
        })
        .collect();

    format!(
        r#"[service]
; Address the HTTP surface listens on
bind = {}
; URL the entity store uses to reach this process (notifications go to <self_url>/react)
self_url = {}
; Seconds between periodic sync-all runs (0 disables)
reconcile_interval_secs = {}

[entity_store]
; NGSI-LD broker base URL
url = {}
timeout_secs = {}
; Attempts for subscription registration and the first sync at startup
startup_retries = {}
; Backoff base delay, doubled after every failed attempt
retry_base_delay_ms = {}

[map_server]
; GeoServer base URL (REST API lives under <url>/rest)
url = {}
user = {}
password = {}
workspace = {}
timeout_secs = {}
; How long the publication role waits for GeoServer at startup
ready_timeout_secs = {}

[area]
; Area name and vintage, used in entity ids and file names
name = {}
vintage = {}
; Nominal ground resolution of the orthophotos in centimetres
resolution_cm = {}

[paths]
; Raw inputs are looked up under <raw>/rgb and <raw>/nir
raw = {}
processed = {}

[path_map]
; <label> = <path seen by this process> => <path seen by the map server>
; The longest matching prefix wins; unmapped files cannot be published.
{}
[index]
; Input entities (empty = derived from [area])
rgb_entity = {}
nir_entity = {}
; One-based band numbers
red_band = {}
green_band = {}
nir_band = {}

[prediction]
; Input entities (empty = derived from [area])
ndvi_entity = {}
ndwi_entity = {}
model_version = {}

[raster]
; Pixels per processing window side; must be a multiple of block_size
window_size = {}
; Output tile size; must be a multiple of 16
block_size = {}
; Number of power-of-two overview levels
overview_levels = {}

[logging]
file = {}
"#,
        config.service.bind,
        config.service.self_url,
        config.service.reconcile_interval_secs,
        config.entity_store.url,
        config.entity_store.timeout_secs,
        config.entity_store.startup_retries,
        config.entity_store.retry_base_delay_ms,
        config.map_server.url,
        config.map_server.user,
        config.map_server.password,
        config.map_server.workspace,
        config.map_server.timeout_secs,
        config.map_server.ready_timeout_secs,
        config.area.name,
        config.area.vintage,
        config.area.resolution_cm,
        path_to_string(&config.paths.raw),
        path_to_string(&config.paths.processed),
        path_map,
        id(&config.index.rgb_entity),
        id(&config.index.nir_entity),
        config.index.red_band,
        config.index.green_band,
        config.index.nir_band,
        id(&config.prediction.ndvi_entity),
        id(&config.prediction.ndwi_entity),
        config.prediction.model_version,
        config.raster.window_size,
        config.raster.block_size,
        config.raster.overview_levels,
        path_to_string(&config.logging.file),
    )
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
