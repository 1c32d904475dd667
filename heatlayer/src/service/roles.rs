//! Which stage a service process runs, and how it is assembled.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::ConfigFile;
use crate::publish::{MapServer, PublicationResolver};
use crate::raster::{HeatModel, PlaceholderModel};
use crate::stage::{
    DirectorySource, IndexBands, IndexReaction, IngestionReaction, PipelineError,
    PredictionReaction, PublicationReaction, Reaction, Stage,
};
use crate::store::EntityStore;

/// One pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Ingestion,
    Index,
    Prediction,
    Publication,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Ingestion, Role::Index, Role::Prediction, Role::Publication];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Ingestion => "ingestion",
            Role::Index => "index",
            Role::Prediction => "prediction",
            Role::Publication => "publication",
        }
    }

    /// Whether the role talks to the map server.
    pub fn needs_map_server(self) -> bool {
        self == Role::Publication
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "unknown stage '{}' (expected ingestion, index, prediction or publication)",
                    s
                ))
            })
    }
}

/// Looks up a heat model by version.
pub fn heat_model(version: &str) -> Result<Arc<dyn HeatModel>, PipelineError> {
    match version {
        "placeholder_v1" => Ok(Arc::new(PlaceholderModel)),
        other => Err(PipelineError::Configuration(format!("unknown model version '{}'", other))),
    }
}

/// Builds the reaction for `role`.
///
/// `server` is required for [`Role::Publication`] and ignored otherwise.
pub fn build_reaction(
    role: Role,
    config: &ConfigFile,
    store: Arc<dyn EntityStore>,
    server: Option<Arc<dyn MapServer>>,
) -> Result<Arc<dyn Reaction>, PipelineError> {
    let area = config.area.area();
    let workspace = config.map_server.workspace.clone();
    let endpoint = config.service.notify_endpoint();
    let tiling = config.raster.tiling();

    let reaction: Arc<dyn Reaction> = match role {
        Role::Ingestion => Arc::new(IngestionReaction::new(
            store,
            Arc::new(DirectorySource::new(&config.paths.raw)),
            area,
            config.area.resolution_cm,
            workspace,
        )),
        Role::Index => {
            let bands = IndexBands::from_one_based(
                config.index.red_band,
                config.index.green_band,
                config.index.nir_band,
            )?;
            Arc::new(IndexReaction::new(
                store,
                config.index.rgb_entity(&area),
                config.index.nir_entity(&area),
                bands,
                area.clone(),
                config.area.resolution_cm,
                workspace,
                &config.paths.processed,
                tiling,
                endpoint,
            ))
        }
        Role::Prediction => Arc::new(PredictionReaction::new(
            store,
            config.prediction.ndvi_entity(&area),
            config.prediction.ndwi_entity(&area),
            heat_model(&config.prediction.model_version)?,
            area.clone(),
            workspace,
            &config.paths.processed,
            tiling,
            endpoint,
        )),
        Role::Publication => {
            let server = server.ok_or_else(|| {
                PipelineError::Configuration("publication stage needs a map server".to_string())
            })?;
            Arc::new(PublicationReaction::new(
                store,
                server,
                PublicationResolver::new(workspace, config.path_map.clone()),
                endpoint,
            ))
        }
    };
    Ok(reaction)
}

/// Builds the guarded stage for `role`.
pub fn build_stage(
    role: Role,
    config: &ConfigFile,
    store: Arc<dyn EntityStore>,
    server: Option<Arc<dyn MapServer>>,
) -> Result<Arc<Stage>, PipelineError> {
    Ok(Arc::new(Stage::new(build_reaction(role, config, store, server)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KNOWN_MODELS;
    use crate::publish::MemoryMapServer;
    use crate::store::MemoryEntityStore;

    #[test]
    fn test_role_parse_and_display() {
        for role in Role::ALL {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
        assert_eq!(" Index ".parse::<Role>().unwrap(), Role::Index);
        assert!("tiler".parse::<Role>().is_err());
    }

    #[test]
    fn test_every_known_model_resolves() {
        for version in KNOWN_MODELS {
            assert_eq!(heat_model(version).unwrap().version(), *version);
        }
        assert!(matches!(heat_model("gbm_v2"), Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn test_stage_names_follow_role() {
        let config = ConfigFile::default();
        let store: Arc<dyn EntityStore> = Arc::new(MemoryEntityStore::new());
        let server: Arc<dyn MapServer> = Arc::new(MemoryMapServer::new());
        for role in Role::ALL {
            let stage = build_stage(role, &config, store.clone(), Some(server.clone())).unwrap();
            assert_eq!(stage.name(), role.as_str());
            assert_eq!(stage.intent().is_some(), role != Role::Ingestion);
        }
    }

    #[test]
    fn test_publication_requires_map_server() {
        let config = ConfigFile::default();
        let store: Arc<dyn EntityStore> = Arc::new(MemoryEntityStore::new());
        let err = build_stage(Role::Publication, &config, store, None).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_zero_band_is_rejected() {
        let mut config = ConfigFile::default();
        config.index.red_band = 0;
        let store: Arc<dyn EntityStore> = Arc::new(MemoryEntityStore::new());
        assert!(build_stage(Role::Index, &config, store, None).is_err());
    }
}
