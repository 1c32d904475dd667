//! In-process map server.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use super::{LayerTarget, MapServer, MapServerError, PublishOutcome, UpsertAction};

#[derive(Debug, Default)]
struct MapState {
    workspaces: BTreeSet<String>,
    /// `(workspace, store)` -> server path
    stores: BTreeMap<(String, String), String>,
    /// `(workspace, layer)` -> title
    layers: BTreeMap<(String, String), String>,
}

/// Map server held in memory, recording what was published.
#[derive(Debug, Default)]
pub struct MemoryMapServer {
    state: Mutex<MapState>,
    offline: AtomicBool,
}

impl MemoryMapServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn has_workspace(&self, workspace: &str) -> bool {
        self.state.lock().workspaces.contains(workspace)
    }

    pub fn store_count(&self) -> usize {
        self.state.lock().stores.len()
    }

    pub fn layer_count(&self) -> usize {
        self.state.lock().layers.len()
    }

    /// Server-side file behind `workspace:store`.
    pub fn store_path(&self, workspace: &str, store: &str) -> Option<String> {
        self.state
            .lock()
            .stores
            .get(&(workspace.to_string(), store.to_string()))
            .cloned()
    }

    fn online(&self) -> Result<(), MapServerError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(MapServerError::Connectivity {
                url: "memory://".to_string(),
                message: "map server offline".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn publish(&self, target: &LayerTarget) -> Result<PublishOutcome, MapServerError> {
        self.online()?;
        let mut state = self.state.lock();
        if !state.workspaces.contains(&target.workspace) {
            return Err(MapServerError::Rejected {
                operation: "create coverage store",
                status: 404,
                body: format!("workspace {} does not exist", target.workspace),
            });
        }
        let store_key = (target.workspace.clone(), target.store.clone());
        let store = match state.stores.insert(store_key, target.server_path.clone()) {
            None => UpsertAction::Created,
            Some(previous) if previous == target.server_path => UpsertAction::Unchanged,
            Some(_) => UpsertAction::Updated,
        };
        let layer_key = (target.workspace.clone(), target.layer.clone());
        let layer = match state.layers.insert(layer_key, target.title.clone()) {
            None => UpsertAction::Created,
            Some(previous) if previous == target.title => UpsertAction::Unchanged,
            Some(_) => UpsertAction::Updated,
        };
        Ok(PublishOutcome { store, layer })
    }
}

impl MapServer for MemoryMapServer {
    fn ensure_workspace<'a>(&'a self, workspace: &'a str) -> BoxFuture<'a, Result<(), MapServerError>> {
        Box::pin(async move {
            self.online()?;
            self.state.lock().workspaces.insert(workspace.to_string());
            Ok(())
        })
    }

    fn upsert_layer<'a>(&'a self, target: &'a LayerTarget) -> BoxFuture<'a, Result<PublishOutcome, MapServerError>> {
        Box::pin(async move { self.publish(target) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Area, EntityId, LayerKind};

    fn target(path: &str) -> LayerTarget {
        LayerTarget {
            entity: EntityId::for_layer(LayerKind::Ndvi.tag(), &Area::new("brussels", "2024")),
            workspace: "uhi".into(),
            store: "store_ndvi".into(),
            layer: "ndvi".into(),
            title: "NDVI Brussels 2024".into(),
            source_path: path.into(),
            server_path: path.into(),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let server = MemoryMapServer::new();
        server.ensure_workspace("uhi").await.unwrap();
        server.ensure_workspace("uhi").await.unwrap();

        let first = server.upsert_layer(&target("/srv/a.tif")).await.unwrap();
        assert_eq!(first.store, UpsertAction::Created);
        assert_eq!(first.layer, UpsertAction::Created);

        let again = server.upsert_layer(&target("/srv/a.tif")).await.unwrap();
        assert_eq!(again.store, UpsertAction::Unchanged);
        assert_eq!(again.layer, UpsertAction::Unchanged);

        let moved = server.upsert_layer(&target("/srv/b.tif")).await.unwrap();
        assert_eq!(moved.store, UpsertAction::Updated);
        assert_eq!(server.store_count(), 1);
        assert_eq!(server.layer_count(), 1);
        assert_eq!(server.store_path("uhi", "store_ndvi").as_deref(), Some("/srv/b.tif"));

        let retitled = LayerTarget {
            title: "NDVI Brussels 2024 (revised)".into(),
            ..target("/srv/b.tif")
        };
        let outcome = server.upsert_layer(&retitled).await.unwrap();
        assert_eq!((outcome.store, outcome.layer), (UpsertAction::Unchanged, UpsertAction::Updated));
    }

    #[tokio::test]
    async fn test_missing_workspace_rejected() {
        let server = MemoryMapServer::new();
        let err = server.upsert_layer(&target("/srv/a.tif")).await.unwrap_err();
        assert!(matches!(err, MapServerError::Rejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_offline() {
        let server = MemoryMapServer::new();
        server.set_offline(true);
        assert!(matches!(
            server.ensure_workspace("uhi").await,
            Err(MapServerError::Connectivity { .. })
        ));
    }
}
