//! In-process entity store with subscription matching.
//!
//! Behaves like a broker for tests and local runs: writes that change a
//! watched attribute queue a notification for each matching
//! subscription, which callers drain and deliver themselves.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use super::{AttributeFilter, EntityStore, StoreError, UpsertOutcome};
use crate::entity::{Entity, EntityId, EntityType, NotificationEvent};
use crate::subscription::{StoredSubscription, SubscriptionIntent};

/// A notification addressed to a subscription endpoint.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub endpoint: String,
    pub event: NotificationEvent,
}

#[derive(Debug, Default)]
struct MemoryState {
    entities: BTreeMap<EntityId, Entity>,
    subscriptions: BTreeMap<String, SubscriptionIntent>,
    outbox: Vec<Delivery>,
}

/// Entity store held in memory.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    state: Mutex<MemoryState>,
    offline: AtomicBool,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: every operation fails with a connectivity error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Connectivity {
                url: "memory://".to_string(),
                message: "store offline".to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Synchronous create-or-replace.
    pub fn upsert(&self, entity: &Entity) -> UpsertOutcome {
        let mut state = self.state.lock();
        let previous = state.entities.get(entity.id());
        let changed = entity.changed_attributes(previous);
        let outcome = match previous {
            Some(p) if p.same_content(entity) => return UpsertOutcome::Unchanged,
            Some(_) => UpsertOutcome::Replaced,
            None => UpsertOutcome::Created,
        };
        state.entities.insert(entity.id().clone(), entity.clone());

        let type_name = entity.entity_type().as_str();
        let deliveries: Vec<Delivery> = state
            .subscriptions
            .iter()
            .filter(|(_, intent)| {
                intent.matches(type_name, entity.id().as_str(), changed.iter().map(String::as_str))
            })
            .map(|(id, intent)| Delivery {
                endpoint: intent.endpoint().to_string(),
                event: NotificationEvent::for_entities(id.clone(), [entity]),
            })
            .collect();
        state.outbox.extend(deliveries);
        outcome
    }

    pub fn entity(&self, id: &EntityId) -> Option<Entity> {
        self.state.lock().entities.get(id).cloned()
    }

    pub fn entity_count(&self) -> usize {
        self.state.lock().entities.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Drains queued notifications.
    pub fn take_deliveries(&self) -> Vec<Delivery> {
        std::mem::take(&mut self.state.lock().outbox)
    }
}

fn filter_matches(entity: &Entity, filter: &AttributeFilter) -> bool {
    entity
        .attributes()
        .get(&filter.attribute)
        .and_then(|attr| attr.get("value"))
        .is_some_and(|v| *v == filter.value)
}

impl EntityStore for MemoryEntityStore {
    fn create_or_replace<'a>(&'a self, entity: &'a Entity) -> BoxFuture<'a, Result<UpsertOutcome, StoreError>> {
        Box::pin(async move {
            self.online()?;
            Ok(self.upsert(entity))
        })
    }

    fn get<'a>(&'a self, id: &'a EntityId) -> BoxFuture<'a, Result<Entity, StoreError>> {
        Box::pin(async move {
            self.online()?;
            self.entity(id).ok_or_else(|| StoreError::NotFound(id.clone()))
        })
    }

    fn query<'a>(
        &'a self,
        entity_type: EntityType,
        filter: Option<&'a AttributeFilter>,
    ) -> BoxFuture<'a, Result<Vec<Entity>, StoreError>> {
        Box::pin(async move {
            self.online()?;
            let state = self.state.lock();
            Ok(state
                .entities
                .values()
                .filter(|e| e.entity_type() == entity_type)
                .filter(|e| filter.map_or(true, |f| filter_matches(e, f)))
                .cloned()
                .collect())
        })
    }

    fn list_subscriptions(&self) -> BoxFuture<'_, Result<Vec<StoredSubscription>, StoreError>> {
        Box::pin(async move {
            self.online()?;
            let state = self.state.lock();
            Ok(state
                .subscriptions
                .iter()
                .map(|(id, intent)| StoredSubscription {
                    id: id.clone(),
                    intent: intent.clone(),
                })
                .collect())
        })
    }

    fn create_subscription<'a>(
        &'a self,
        id: &'a str,
        intent: &'a SubscriptionIntent,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.online()?;
            let mut state = self.state.lock();
            if state.subscriptions.contains_key(id) {
                return Err(StoreError::Rejected {
                    operation: "create subscription",
                    status: 409,
                    body: format!("subscription {} already exists", id),
                });
            }
            state.subscriptions.insert(id.to_string(), intent.clone());
            Ok(())
        })
    }

    fn delete_subscription<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.online()?;
            self.state.lock().subscriptions.remove(id);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Area, GeospatialLayer, LayerKind};
    use crate::subscription::EntitySelector;

    fn nir(path: &str) -> Entity {
        GeospatialLayer::new(LayerKind::Nir, &Area::new("brussels", "2024"), path, 40, "uhi").into()
    }

    #[tokio::test]
    async fn test_identical_upsert_is_unchanged() {
        let store = MemoryEntityStore::new();
        let entity = nir("/data/raw/nir/nir.tif");
        assert_eq!(store.create_or_replace(&entity).await.unwrap(), UpsertOutcome::Created);
        assert_eq!(store.create_or_replace(&entity).await.unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(store.entity_count(), 1);
        assert_eq!(store.get(entity.id()).await.unwrap(), entity);
    }

    #[tokio::test]
    async fn test_notifies_only_on_watched_change() {
        let store = MemoryEntityStore::new();
        let entity = nir("/data/raw/nir/a.tif");
        let intent = SubscriptionIntent::new(
            [EntitySelector::of_id(EntityType::GeoSpatialLayer, entity.id().clone())],
            ["filePath"],
            "http://index/react",
        );
        store.create_subscription("urn:ngsi-ld:Subscription:t", &intent).await.unwrap();

        store.create_or_replace(&entity).await.unwrap();
        let deliveries = store.take_deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].endpoint, "http://index/react");
        assert_eq!(deliveries[0].event.entity_refs()[0].id, entity.id().as_str());

        // name change only: not watched
        let Entity::Layer(mut layer) = entity.clone() else { unreachable!() };
        layer.name = "renamed".into();
        store.create_or_replace(&layer.clone().into()).await.unwrap();
        assert!(store.take_deliveries().is_empty());

        layer.file_path = "/data/raw/nir/b.tif".into();
        store.create_or_replace(&layer.into()).await.unwrap();
        assert_eq!(store.take_deliveries().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_subscription_conflicts() {
        let store = MemoryEntityStore::new();
        let intent = SubscriptionIntent::new(
            [EntitySelector::of_type(EntityType::UhiHeatMap)],
            ["filePath"],
            "http://x/react",
        );
        store.create_subscription("s", &intent).await.unwrap();
        assert!(matches!(
            store.create_subscription("s", &intent).await,
            Err(StoreError::Rejected { status: 409, .. })
        ));
        store.delete_subscription("s").await.unwrap();
        store.delete_subscription("s").await.unwrap();
        assert_eq!(store.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_offline_is_connectivity_error() {
        let store = MemoryEntityStore::new();
        store.set_offline(true);
        let err = store.get(&EntityId::parse("urn:ngsi-ld:X:y").unwrap()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_query_filter() {
        let store = MemoryEntityStore::new();
        let published = nir("/data/raw/nir/a.tif");
        let hidden = GeospatialLayer::new(
            LayerKind::Rgb,
            &Area::new("brussels", "2024"),
            "/data/raw/rgb/a.tif",
            40,
            "uhi",
        )
        .with_publish(false);
        store.upsert(&published);
        store.upsert(&Entity::Layer(hidden));

        let all = store.query(EntityType::GeoSpatialLayer, None).await.unwrap();
        assert_eq!(all.len(), 2);
        let filter = AttributeFilter::equals("publishToGeoserver", true);
        let only = store.query(EntityType::GeoSpatialLayer, Some(&filter)).await.unwrap();
        assert_eq!(only, vec![published]);
        assert!(store.query(EntityType::UhiHeatMap, None).await.unwrap().is_empty());
    }
}
