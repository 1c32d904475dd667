//! Entity store seam.
//!
//! Stages talk to the store only through [`EntityStore`], so the HTTP
//! client and the in-memory implementation are interchangeable.

mod memory;
mod orion;

pub use memory::{Delivery, MemoryEntityStore};
pub use orion::OrionClient;

use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

use crate::entity::{Entity, EntityError, EntityId, EntityType};
use crate::subscription::{StoredSubscription, SubscriptionIntent};

/// Errors from entity store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No entity with this id
    #[error("entity {0} not found")]
    NotFound(EntityId),

    /// Store unreachable, timed out, or failing with a server error
    #[error("entity store unreachable at {url}: {message}")]
    Connectivity { url: String, message: String },

    /// Store refused the request
    #[error("entity store rejected {operation}: HTTP {status}: {body}")]
    Rejected {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// Store returned something that is not a valid entity
    #[error("invalid entity payload: {0}")]
    InvalidPayload(#[from] EntityError),

    /// Response body was not the JSON the operation expects
    #[error("entity store answered {operation} with an unreadable body: {message}")]
    InvalidResponse { operation: &'static str, message: String },
}

impl StoreError {
    /// True for failures worth retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connectivity { .. })
    }
}

/// What `create_or_replace` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Replaced,
    /// Stored entity already had identical content
    Unchanged,
}

/// Attribute filter applied by [`EntityStore::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeFilter {
    pub attribute: String,
    pub value: serde_json::Value,
}

impl AttributeFilter {
    pub fn equals(attribute: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// NGSI-LD query language form, e.g. `publishToGeoserver==true`.
    pub fn to_query(&self) -> String {
        format!("{}=={}", self.attribute, self.value)
    }
}

/// Operations the pipeline needs from an NGSI-LD entity store.
pub trait EntityStore: Send + Sync {
    /// Creates the entity, or replaces the attributes of an existing one.
    ///
    /// Writing identical content again leaves the store unchanged.
    fn create_or_replace<'a>(&'a self, entity: &'a Entity) -> BoxFuture<'a, Result<UpsertOutcome, StoreError>>;

    /// Fetches one entity.
    fn get<'a>(&'a self, id: &'a EntityId) -> BoxFuture<'a, Result<Entity, StoreError>>;

    /// All entities of a type, optionally filtered on one attribute.
    ///
    /// Entries that cannot be decoded are skipped with a warning.
    fn query<'a>(
        &'a self,
        entity_type: EntityType,
        filter: Option<&'a AttributeFilter>,
    ) -> BoxFuture<'a, Result<Vec<Entity>, StoreError>>;

    fn list_subscriptions(&self) -> BoxFuture<'_, Result<Vec<StoredSubscription>, StoreError>>;

    /// Registers a subscription. Fails with `Rejected { status: 409 }` if
    /// the id is taken.
    fn create_subscription<'a>(
        &'a self,
        id: &'a str,
        intent: &'a SubscriptionIntent,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Removes a subscription; removing an unknown id succeeds.
    fn delete_subscription<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;
}
