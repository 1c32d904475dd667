//! Entity -> published layer resolution.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::entity::{Entity, EntityId, HEAT_MAP_LAYER};

/// Default title for predictions without a name.
const HEAT_MAP_TITLE: &str = "UHI Heat Risk Prediction";

/// Errors resolving an entity into a publication target.
#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("no path mapping covers {} (entity {entity})", path.display())]
    UnmappedPath { entity: EntityId, path: PathBuf },
}

/// Maps file paths as seen by the pipeline to paths seen by the map server.
///
/// Prefixes match whole path components; the longest match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMap {
    entries: Vec<(PathBuf, String)>,
}

impl PathMap {
    pub fn new<P, S>(pairs: impl IntoIterator<Item = (P, S)>) -> Self
    where
        P: Into<PathBuf>,
        S: Into<String>,
    {
        let mut entries: Vec<(PathBuf, String)> = pairs
            .into_iter()
            .map(|(p, s)| (p.into(), s.into()))
            .collect();
        entries.sort_by(|a, b| {
            b.0.components()
                .count()
                .cmp(&a.0.components().count())
                .then_with(|| a.0.cmp(&b.0))
        });
        Self { entries }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.entries.iter().map(|(p, s)| (p.as_path(), s.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Translates `path`, or `None` if no prefix covers it.
    pub fn translate(&self, path: &Path) -> Option<String> {
        self.entries.iter().find_map(|(prefix, target)| {
            let rest = path.strip_prefix(prefix).ok()?;
            let target = target.trim_end_matches('/');
            if rest.as_os_str().is_empty() {
                Some(target.to_string())
            } else {
                Some(format!("{}/{}", target, rest.display()))
            }
        })
    }
}

impl Default for PathMap {
    fn default() -> Self {
        Self::new([
            ("/data/processed", "/opt/geoserver_data/data/uhi_processed"),
            ("/data/raw", "/opt/geoserver_data/data/uhi_raw"),
        ])
    }
}

/// Where and how one entity is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerTarget {
    pub entity: EntityId,
    pub workspace: String,
    pub store: String,
    pub layer: String,
    pub title: String,
    pub source_path: PathBuf,
    pub server_path: String,
}

impl LayerTarget {
    /// `workspace:layer`
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.workspace, self.layer)
    }
}

/// Turns publish-flagged entities into layer targets.
#[derive(Debug, Clone)]
pub struct PublicationResolver {
    workspace: String,
    path_map: PathMap,
}

impl PublicationResolver {
    pub fn new(workspace: impl Into<String>, path_map: PathMap) -> Self {
        Self {
            workspace: workspace.into(),
            path_map,
        }
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    /// Target for `entity`, or `None` when it is not flagged for publication.
    pub fn resolve(&self, entity: &Entity) -> Result<Option<LayerTarget>, ResolveError> {
        if !entity.publish() {
            return Ok(None);
        }
        let (layer, default_title) = match entity {
            Entity::Layer(l) => (l.kind.layer_name(), l.kind.tag()),
            Entity::Prediction(_) => (HEAT_MAP_LAYER.to_string(), HEAT_MAP_TITLE),
        };
        let title = match entity.name() {
            "" => default_title.to_string(),
            name => name.to_string(),
        };
        let source_path = entity.file_path().to_path_buf();
        let server_path =
            self.path_map
                .translate(&source_path)
                .ok_or_else(|| ResolveError::UnmappedPath {
                    entity: entity.id().clone(),
                    path: source_path.clone(),
                })?;

        Ok(Some(LayerTarget {
            entity: entity.id().clone(),
            workspace: self.workspace.clone(),
            store: format!("store_{}", layer),
            layer,
            title,
            source_path,
            server_path,
        }))
    }
}
