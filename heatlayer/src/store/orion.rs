//! NGSI-LD context broker client (Orion-LD and compatibles).

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{AttributeFilter, EntityStore, StoreError, UpsertOutcome};
use crate::entity::{Entity, EntityId, EntityType, NGSI_LD_CONTEXT};
use crate::subscription::{StoredSubscription, SubscriptionIntent};

const LD_JSON: &str = "application/ld+json";
const QUERY_LIMIT: &str = "1000";

/// HTTP client for an NGSI-LD entity store.
#[derive(Debug, Clone)]
pub struct OrionClient {
    base_url: String,
    client: Client,
}

impl OrionClient {
    /// Creates a client for the broker at `base_url` (e.g. `http://orion:1026`).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Connectivity {
                url: base_url.clone(),
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn entities_url(&self) -> String {
        format!("{}/ngsi-ld/v1/entities", self.base_url)
    }

    fn entity_url(&self, id: &EntityId) -> String {
        format!("{}/{}", self.entities_url(), id)
    }

    fn subscriptions_url(&self) -> String {
        format!("{}/ngsi-ld/v1/subscriptions", self.base_url)
    }

    fn unreachable(&self, e: reqwest::Error) -> StoreError {
        StoreError::Connectivity {
            url: self.base_url.clone(),
            message: e.to_string(),
        }
    }

    /// Reads a JSON body; a malformed body is not retried.
    async fn decode<T: DeserializeOwned>(&self, operation: &'static str, response: Response) -> Result<T, StoreError> {
        response.json().await.map_err(|e| {
            if e.is_decode() {
                StoreError::InvalidResponse {
                    operation,
                    message: e.to_string(),
                }
            } else {
                self.unreachable(e)
            }
        })
    }

    /// Maps an unsuccessful response to an error; 5xx counts as connectivity.
    async fn failure(&self, operation: &'static str, response: Response) -> StoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            StoreError::Connectivity {
                url: self.base_url.clone(),
                message: format!("{} returned HTTP {}: {}", operation, status.as_u16(), body),
            }
        } else {
            StoreError::Rejected {
                operation,
                status: status.as_u16(),
                body,
            }
        }
    }

    /// Liveness probe against the broker's version endpoint.
    pub async fn version(&self) -> Result<Value, StoreError> {
        let response = self
            .client
            .get(format!("{}/version", self.base_url))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        if !response.status().is_success() {
            return Err(self.failure("version", response).await);
        }
        self.decode("version", response).await
    }

    async fn fetch(&self, id: &EntityId) -> Result<Entity, StoreError> {
        let response = self
            .client
            .get(self.entity_url(id))
            .query(&[("local", "true")])
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        match response.status() {
            s if s.is_success() => {
                let body: Value = self.decode("get entity", response).await?;
                Ok(Entity::from_ngsi_ld(&body)?)
            }
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(id.clone())),
            _ => Err(self.failure("get entity", response).await),
        }
    }

    /// Replaces the whole entity; attributes absent from `entity` are dropped.
    async fn replace_entity(&self, entity: &Entity) -> Result<(), StoreError> {
        let mut attrs = entity.attributes();
        attrs.insert("@context".into(), json!([NGSI_LD_CONTEXT]));
        let response = self
            .client
            .put(self.entity_url(entity.id()))
            .header(CONTENT_TYPE, LD_JSON)
            .body(Value::Object(attrs).to_string())
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.failure("replace entity", response).await)
        }
    }

    async fn upsert(&self, entity: &Entity) -> Result<UpsertOutcome, StoreError> {
        match self.fetch(entity.id()).await {
            Ok(existing) if existing.same_content(entity) => {
                debug!(entity = %entity.id(), "Entity unchanged; skipping write");
                return Ok(UpsertOutcome::Unchanged);
            }
            Ok(_) => {
                self.replace_entity(entity).await?;
                info!(entity = %entity.id(), "Entity updated");
                return Ok(UpsertOutcome::Replaced);
            }
            Err(StoreError::InvalidPayload(e)) => {
                warn!(entity = %entity.id(), error = %e, "Stored entity unreadable; overwriting");
                self.replace_entity(entity).await?;
                return Ok(UpsertOutcome::Replaced);
            }
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let response = self
            .client
            .post(self.entities_url())
            .header(CONTENT_TYPE, LD_JSON)
            .body(entity.to_ngsi_ld().to_string())
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        match response.status() {
            s if s.is_success() => {
                info!(entity = %entity.id(), "Entity created");
                Ok(UpsertOutcome::Created)
            }
            StatusCode::CONFLICT => {
                // created concurrently since the lookup
                self.replace_entity(entity).await?;
                info!(entity = %entity.id(), "Entity updated");
                Ok(UpsertOutcome::Replaced)
            }
            _ => Err(self.failure("create entity", response).await),
        }
    }

    async fn list_entities(
        &self,
        entity_type: EntityType,
        filter: Option<&AttributeFilter>,
    ) -> Result<Vec<Entity>, StoreError> {
        let mut params = vec![
            ("type", entity_type.as_str().to_string()),
            ("local", "true".to_string()),
            ("limit", QUERY_LIMIT.to_string()),
        ];
        if let Some(filter) = filter {
            params.push(("q", filter.to_query()));
        }
        let response = self
            .client
            .get(self.entities_url())
            .query(&params)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        if !response.status().is_success() {
            return Err(self.failure("query entities", response).await);
        }
        let items: Vec<Value> = self.decode("query entities", response).await?;
        Ok(items
            .iter()
            .filter_map(|item| match Entity::from_ngsi_ld(item) {
                Ok(entity) => Some(entity),
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable entity");
                    None
                }
            })
            .collect())
    }

    async fn fetch_subscriptions(&self) -> Result<Vec<StoredSubscription>, StoreError> {
        let response = self
            .client
            .get(self.subscriptions_url())
            .query(&[("limit", QUERY_LIMIT)])
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        if !response.status().is_success() {
            return Err(self.failure("list subscriptions", response).await);
        }
        let items: Vec<Value> = self.decode("list subscriptions", response).await?;
        Ok(items
            .iter()
            .filter_map(SubscriptionIntent::from_ngsi_ld)
            .map(|(id, intent)| StoredSubscription { id, intent })
            .collect())
    }

    async fn post_subscription(&self, id: &str, intent: &SubscriptionIntent) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.subscriptions_url())
            .header(CONTENT_TYPE, LD_JSON)
            .body(intent.to_ngsi_ld(id).to_string())
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        if response.status().is_success() {
            info!(subscription = id, endpoint = intent.endpoint(), "Subscription created");
            Ok(())
        } else {
            Err(self.failure("create subscription", response).await)
        }
    }

    async fn remove_subscription(&self, id: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(format!("{}/{}", self.subscriptions_url(), id))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        match response.status() {
            s if s.is_success() => {
                info!(subscription = id, "Subscription deleted");
                Ok(())
            }
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(self.failure("delete subscription", response).await),
        }
    }
}

impl EntityStore for OrionClient {
    fn create_or_replace<'a>(&'a self, entity: &'a Entity) -> BoxFuture<'a, Result<UpsertOutcome, StoreError>> {
        Box::pin(self.upsert(entity))
    }

    fn get<'a>(&'a self, id: &'a EntityId) -> BoxFuture<'a, Result<Entity, StoreError>> {
        Box::pin(self.fetch(id))
    }

    fn query<'a>(
        &'a self,
        entity_type: EntityType,
        filter: Option<&'a AttributeFilter>,
    ) -> BoxFuture<'a, Result<Vec<Entity>, StoreError>> {
        Box::pin(self.list_entities(entity_type, filter))
    }

    fn list_subscriptions(&self) -> BoxFuture<'_, Result<Vec<StoredSubscription>, StoreError>> {
        Box::pin(self.fetch_subscriptions())
    }

    fn create_subscription<'a>(
        &'a self,
        id: &'a str,
        intent: &'a SubscriptionIntent,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.post_subscription(id, intent))
    }

    fn delete_subscription<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.remove_subscription(id))
    }
}
