//! Environment variable overrides.
//!
//! `HEATLAYER__<SECTION>__<KEY>=value` sets `key` in `[section]` before the
//! INI is parsed, so overrides go through the same validation as the file.

use ini::Ini;
use tracing::debug;

/// Variable naming an alternative config file.
pub const ENV_CONFIG_PATH: &str = "HEATLAYER_CONFIG";

/// Prefix of per-key override variables.
pub const ENV_OVERRIDE_PREFIX: &str = "HEATLAYER__";

/// Applies matching variables to `ini`, returning how many were applied.
pub(super) fn apply_env_overrides(ini: &mut Ini, vars: impl IntoIterator<Item = (String, String)>) -> usize {
    let mut applied = 0;
    for (name, value) in vars {
        let Some(rest) = name.strip_prefix(ENV_OVERRIDE_PREFIX) else {
            continue;
        };
        let Some((section, key)) = rest.split_once("__") else {
            continue;
        };
        if section.is_empty() || key.is_empty() {
            continue;
        }
        let (section, key) = (section.to_lowercase(), key.to_lowercase());
        debug!(section = %section, key = %key, "Config override from environment");
        ini.with_section(Some(section)).set(key, value);
        applied += 1;
    }
    applied
}
