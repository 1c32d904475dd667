//! Entity identifiers and types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::EntityError;

/// Prefix every NGSI-LD entity URN carries.
pub const URN_PREFIX: &str = "urn:ngsi-ld:";

/// Entity types the pipeline reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    /// Raw or derived raster layer
    #[serde(rename = "GeoSpatialLayer")]
    GeoSpatialLayer,
    /// Heat-risk prediction raster
    #[serde(rename = "UHIHeatMap")]
    UhiHeatMap,
}

impl EntityType {
    pub const ALL: [EntityType; 2] = [EntityType::GeoSpatialLayer, EntityType::UhiHeatMap];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::GeoSpatialLayer => "GeoSpatialLayer",
            EntityType::UhiHeatMap => "UHIHeatMap",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Stores may return types expanded against the default context
        let short = s.rsplit('/').next().unwrap_or(s);
        match short {
            "GeoSpatialLayer" => Ok(EntityType::GeoSpatialLayer),
            "UHIHeatMap" => Ok(EntityType::UhiHeatMap),
            _ => Err(EntityError::UnknownType(s.to_string())),
        }
    }
}

/// Geographic area and vintage a dataset covers, e.g. brussels / 2024.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Area {
    pub name: String,
    pub vintage: String,
}

impl Area {
    pub fn new(name: impl Into<String>, vintage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vintage: vintage.into(),
        }
    }

    /// Area name with its first letter capitalised, for titles.
    pub fn display_name(&self) -> String {
        let mut chars = self.name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    /// File stem suffix, e.g. `brussels_2024`.
    pub fn file_suffix(&self) -> String {
        format!("{}_{}", self.name, self.vintage)
    }
}

/// NGSI-LD entity URN.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Validates `urn:ngsi-ld:<Type>:<rest>`.
    pub fn parse(s: &str) -> Result<Self, EntityError> {
        let rest = s
            .strip_prefix(URN_PREFIX)
            .ok_or_else(|| EntityError::InvalidId(s.to_string()))?;
        let mut parts = rest.splitn(2, ':');
        let type_segment = parts.next().unwrap_or("");
        let local = parts.next().unwrap_or("");
        if type_segment.is_empty() || local.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(EntityError::InvalidId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// `urn:ngsi-ld:GeoSpatialLayer:<tag>:<area>:<vintage>`
    pub fn for_layer(tag: &str, area: &Area) -> Self {
        Self(format!(
            "{}{}:{}:{}:{}",
            URN_PREFIX,
            EntityType::GeoSpatialLayer,
            tag,
            area.name,
            area.vintage
        ))
    }

    /// `urn:ngsi-ld:UHIHeatMap:<area>:<vintage>`
    pub fn for_heat_map(area: &Area) -> Self {
        Self(format!(
            "{}{}:{}:{}",
            URN_PREFIX,
            EntityType::UhiHeatMap,
            area.name,
            area.vintage
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Type segment of the URN.
    pub fn type_segment(&self) -> &str {
        self.0[URN_PREFIX.len()..].split(':').next().unwrap_or("")
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}
