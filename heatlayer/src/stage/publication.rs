//! Keeps the map server in step with publish-flagged entities.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info};

use super::{PipelineError, Reaction, RunReport, Trigger};
use crate::entity::{Entity, EntityType};
use crate::publish::{MapServer, PublicationResolver};
use crate::store::{AttributeFilter, EntityStore};
use crate::subscription::{EntitySelector, SubscriptionIntent};

/// Upserts a map layer for every publish-flagged entity.
///
/// Notifications carry the entity snapshots to publish; manual and
/// reconcile runs query the store for every flagged entity instead, so a
/// sync-all replays the upsert for everything currently flagged. A run
/// stops at the first failure.
pub struct PublicationReaction {
    store: Arc<dyn EntityStore>,
    server: Arc<dyn MapServer>,
    resolver: PublicationResolver,
    intent: SubscriptionIntent,
}

impl PublicationReaction {
    pub fn new(
        store: Arc<dyn EntityStore>,
        server: Arc<dyn MapServer>,
        resolver: PublicationResolver,
        endpoint: impl Into<String>,
    ) -> Self {
        let intent = SubscriptionIntent::new(
            EntityType::ALL.map(EntitySelector::of_type),
            ["publishToGeoserver", "filePath"],
            endpoint,
        )
        .with_description("Publish flagged layers to the map server");
        Self {
            store,
            server,
            resolver,
            intent,
        }
    }

    async fn flagged_entities(&self) -> Result<Vec<Entity>, PipelineError> {
        let filter = AttributeFilter::equals("publishToGeoserver", true);
        let mut entities = Vec::new();
        for entity_type in EntityType::ALL {
            entities.extend(self.store.query(entity_type, Some(&filter)).await?);
        }
        Ok(entities)
    }

    async fn sync(&self, trigger: &Trigger) -> Result<RunReport, PipelineError> {
        let entities = match trigger {
            Trigger::Notification(event) => event
                .entities()
                .into_iter()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| PipelineError::Internal(format!("undecodable notification: {}", e)))?,
            Trigger::Manual | Trigger::Reconcile => self.flagged_entities().await?,
        };

        self.server.ensure_workspace(self.resolver.workspace()).await?;

        let mut report = RunReport::default();
        for entity in &entities {
            let Some(target) = self.resolver.resolve(entity)? else {
                debug!(entity_id = %entity.id(), "Not flagged for publication");
                report.skipped.push(entity.id().clone());
                continue;
            };
            let outcome = self.server.upsert_layer(&target).await?;
            info!(
                entity_id = %entity.id(),
                layer = %target.qualified_name(),
                store = ?outcome.store,
                coverage = ?outcome.layer,
                "Layer synchronised"
            );
            report.published.push(target.qualified_name());
        }
        Ok(report)
    }
}

impl Reaction for PublicationReaction {
    fn name(&self) -> &str {
        "publication"
    }

    fn intent(&self) -> Option<&SubscriptionIntent> {
        Some(&self.intent)
    }

    fn execute<'a>(&'a self, trigger: &'a Trigger) -> BoxFuture<'a, Result<RunReport, PipelineError>> {
        Box::pin(self.sync(trigger))
    }
}
