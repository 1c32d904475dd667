//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This module contains the `parse_ini()` function and its helpers.
//! It is the single place where INI key names are mapped to struct fields.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::ConfigFile;
use crate::entity::EntityId;
use crate::publish::PathMap;

/// Separator between the two sides of a `[path_map]` entry.
const PATH_MAP_ARROW: &str = "=>";

/// Model versions this build can run.
pub const KNOWN_MODELS: &[&str] = &["placeholder_v1"];

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [service] section
    if let Some(section) = ini.section(Some("service")) {
        if let Some(v) = non_empty(section, "bind") {
            v.parse::<std::net::SocketAddr>()
                .map_err(|_| invalid("service", "bind", v, "expected host:port, e.g. 0.0.0.0:8000"))?;
            config.service.bind = v.to_string();
        }
        if let Some(v) = non_empty(section, "self_url") {
            config.service.self_url = parse_url("service", "self_url", v)?;
        }
        if let Some(v) = section.get("reconcile_interval_secs") {
            config.service.reconcile_interval_secs =
                parse_number("service", "reconcile_interval_secs", v, "seconds, 0 disables")?;
        }
    }

    // [entity_store] section
    if let Some(section) = ini.section(Some("entity_store")) {
        if let Some(v) = non_empty(section, "url") {
            config.entity_store.url = parse_url("entity_store", "url", v)?;
        }
        if let Some(v) = section.get("timeout_secs") {
            config.entity_store.timeout_secs =
                parse_positive("entity_store", "timeout_secs", v, "seconds")?;
        }
        if let Some(v) = section.get("startup_retries") {
            config.entity_store.startup_retries =
                parse_positive("entity_store", "startup_retries", v, "attempts")?;
        }
        if let Some(v) = section.get("retry_base_delay_ms") {
            config.entity_store.retry_base_delay_ms =
                parse_number("entity_store", "retry_base_delay_ms", v, "milliseconds")?;
        }
    }

    // [map_server] section
    if let Some(section) = ini.section(Some("map_server")) {
        if let Some(v) = non_empty(section, "url") {
            config.map_server.url = parse_url("map_server", "url", v)?;
        }
        if let Some(v) = section.get("user") {
            config.map_server.user = v.trim().to_string();
        }
        if let Some(v) = section.get("password") {
            config.map_server.password = v.to_string();
        }
        if let Some(v) = non_empty(section, "workspace") {
            if !v.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                return Err(invalid(
                    "map_server",
                    "workspace",
                    v,
                    "letters, digits, '_' and '-' only",
                ));
            }
            config.map_server.workspace = v.to_string();
        }
        if let Some(v) = section.get("timeout_secs") {
            config.map_server.timeout_secs =
                parse_positive("map_server", "timeout_secs", v, "seconds")?;
        }
        if let Some(v) = section.get("ready_timeout_secs") {
            config.map_server.ready_timeout_secs =
                parse_number("map_server", "ready_timeout_secs", v, "seconds")?;
        }
    }

    // [area] section
    if let Some(section) = ini.section(Some("area")) {
        if let Some(v) = non_empty(section, "name") {
            config.area.name = parse_id_segment("area", "name", v)?;
        }
        if let Some(v) = non_empty(section, "vintage") {
            config.area.vintage = parse_id_segment("area", "vintage", v)?;
        }
        if let Some(v) = section.get("resolution_cm") {
            config.area.resolution_cm = parse_positive("area", "resolution_cm", v, "centimetres")?;
        }
    }

    // [paths] section
    if let Some(section) = ini.section(Some("paths")) {
        if let Some(v) = non_empty(section, "raw") {
            config.paths.raw = expand_tilde(v);
        }
        if let Some(v) = non_empty(section, "processed") {
            config.paths.processed = expand_tilde(v);
        }
    }

    // [path_map] section replaces the default table when present
    if let Some(section) = ini.section(Some("path_map")) {
        if !section.is_empty() {
            config.path_map = parse_path_map(section)?;
        }
    }

    // [index] section
    if let Some(section) = ini.section(Some("index")) {
        if let Some(v) = non_empty(section, "rgb_entity") {
            config.index.rgb_entity = Some(parse_entity_id("index", "rgb_entity", v)?);
        }
        if let Some(v) = non_empty(section, "nir_entity") {
            config.index.nir_entity = Some(parse_entity_id("index", "nir_entity", v)?);
        }
        if let Some(v) = section.get("red_band") {
            config.index.red_band = parse_positive("index", "red_band", v, "one-based band number")?;
        }
        if let Some(v) = section.get("green_band") {
            config.index.green_band =
                parse_positive("index", "green_band", v, "one-based band number")?;
        }
        if let Some(v) = section.get("nir_band") {
            config.index.nir_band = parse_positive("index", "nir_band", v, "one-based band number")?;
        }
    }

    // [prediction] section
    if let Some(section) = ini.section(Some("prediction")) {
        if let Some(v) = non_empty(section, "ndvi_entity") {
            config.prediction.ndvi_entity = Some(parse_entity_id("prediction", "ndvi_entity", v)?);
        }
        if let Some(v) = non_empty(section, "ndwi_entity") {
            config.prediction.ndwi_entity = Some(parse_entity_id("prediction", "ndwi_entity", v)?);
        }
        if let Some(v) = non_empty(section, "model_version") {
            if !KNOWN_MODELS.contains(&v) {
                return Err(invalid(
                    "prediction",
                    "model_version",
                    v,
                    &format!("must be one of: {}", KNOWN_MODELS.join(", ")),
                ));
            }
            config.prediction.model_version = v.to_string();
        }
    }

    // [raster] section
    if let Some(section) = ini.section(Some("raster")) {
        if let Some(v) = section.get("window_size") {
            config.raster.window_size = parse_positive("raster", "window_size", v, "pixels")?;
        }
        if let Some(v) = section.get("block_size") {
            let block: u32 = parse_positive("raster", "block_size", v, "pixels")?;
            if block % 16 != 0 {
                return Err(invalid("raster", "block_size", v, "must be a multiple of 16"));
            }
            config.raster.block_size = block;
        }
        if let Some(v) = section.get("overview_levels") {
            config.raster.overview_levels = parse_number("raster", "overview_levels", v, "0-10")?;
            if config.raster.overview_levels > 10 {
                return Err(invalid("raster", "overview_levels", v, "must be 0-10"));
            }
        }
    }
    if config.raster.window_size % config.raster.block_size != 0 {
        return Err(invalid(
            "raster",
            "window_size",
            &config.raster.window_size.to_string(),
            &format!("must be a multiple of block_size ({})", config.raster.block_size),
        ));
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = non_empty(section, "file") {
            config.logging.file = expand_tilde(v);
        }
    }

    Ok(config)
}

/// Parses `label = /producer/prefix => /server/prefix` entries.
fn parse_path_map(section: &Properties) -> Result<PathMap, ConfigFileError> {
    let mut pairs = Vec::new();
    for (label, value) in section.iter() {
        let Some((local, remote)) = value.split_once(PATH_MAP_ARROW) else {
            return Err(invalid(
                "path_map",
                label,
                value,
                "expected '<producer prefix> => <map server prefix>'",
            ));
        };
        let (local, remote) = (local.trim(), remote.trim());
        if !Path::new(local).is_absolute() || !remote.starts_with('/') {
            return Err(invalid("path_map", label, value, "both prefixes must be absolute"));
        }
        pairs.push((PathBuf::from(local), remote.to_string()));
    }
    Ok(PathMap::new(pairs))
}

fn non_empty<'a>(section: &'a Properties, key: &str) -> Option<&'a str> {
    section.get(key).map(str::trim).filter(|v| !v.is_empty())
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_number<T: FromStr>(section: &str, key: &str, v: &str, unit: &str) -> Result<T, ConfigFileError> {
    v.trim()
        .parse()
        .map_err(|_| invalid(section, key, v, &format!("must be a non-negative integer ({})", unit)))
}

fn parse_positive<T>(section: &str, key: &str, v: &str, unit: &str) -> Result<T, ConfigFileError>
where
    T: FromStr + PartialOrd + Default,
{
    let n: T = v
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, v, &format!("must be a positive integer ({})", unit)))?;
    if n <= T::default() {
        return Err(invalid(section, key, v, &format!("must be a positive integer ({})", unit)));
    }
    Ok(n)
}

fn parse_url(section: &str, key: &str, v: &str) -> Result<String, ConfigFileError> {
    if v.starts_with("http://") || v.starts_with("https://") {
        Ok(v.trim_end_matches('/').to_string())
    } else {
        Err(invalid(section, key, v, "must start with http:// or https://"))
    }
}

fn parse_entity_id(section: &str, key: &str, v: &str) -> Result<EntityId, ConfigFileError> {
    EntityId::parse(v).map_err(|e| invalid(section, key, v, &e.to_string()))
}

/// Area names and vintages end up in entity ids and file names.
fn parse_id_segment(section: &str, key: &str, v: &str) -> Result<String, ConfigFileError> {
    if v.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        Ok(v.to_lowercase())
    } else {
        Err(invalid(section, key, v, "letters, digits, '_' and '-' only"))
    }
}

/// Expand `~/` to the user's home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
