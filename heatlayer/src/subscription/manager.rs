//! Idempotent subscription registration.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::intent::SubscriptionIntent;
use crate::store::{EntityStore, StoreError};

/// Registration state of one intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentState {
    Absent,
    Registering,
    Active,
}

/// What [`SubscriptionManager::ensure`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// An equivalent subscription was already registered
    AlreadyActive,
    /// A new subscription was created
    Registered,
    /// A stale subscription with the same id was replaced
    Replaced,
}

/// Keeps subscriptions registered exactly once, whatever the number of restarts.
pub struct SubscriptionManager {
    store: Arc<dyn EntityStore>,
    states: Mutex<HashMap<String, IntentState>>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("states", &*self.states.lock())
            .finish()
    }
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self, id: &str) -> IntentState {
        self.states
            .lock()
            .get(id)
            .copied()
            .unwrap_or(IntentState::Absent)
    }

    fn set_state(&self, id: &str, state: IntentState) {
        self.states.lock().insert(id.to_string(), state);
    }

    /// Registers `intent` under `id` unless an equivalent one exists.
    ///
    /// A subscription holding `id` with different content is deleted and
    /// recreated, so exactly one copy remains afterwards.
    pub async fn ensure(
        &self,
        id: &str,
        intent: &SubscriptionIntent,
    ) -> Result<EnsureOutcome, StoreError> {
        self.set_state(id, IntentState::Registering);
        let result = self.reconcile(id, intent).await;
        match &result {
            Ok(outcome) => {
                self.set_state(id, IntentState::Active);
                debug!(subscription = id, outcome = ?outcome, "Subscription ensured");
            }
            Err(e) => {
                self.set_state(id, IntentState::Absent);
                warn!(subscription = id, error = %e, "Subscription registration failed");
            }
        }
        result
    }

    async fn reconcile(
        &self,
        id: &str,
        intent: &SubscriptionIntent,
    ) -> Result<EnsureOutcome, StoreError> {
        let existing = self.store.list_subscriptions().await?;
        if let Some(found) = existing.iter().find(|s| s.intent.equivalent(intent)) {
            info!(subscription = %found.id, "Equivalent subscription already registered");
            return Ok(EnsureOutcome::AlreadyActive);
        }

        if existing.iter().any(|s| s.id == id) {
            info!(subscription = id, "Replacing stale subscription");
            self.store.delete_subscription(id).await?;
            self.store.create_subscription(id, intent).await?;
            return Ok(EnsureOutcome::Replaced);
        }

        match self.store.create_subscription(id, intent).await {
            Ok(()) => Ok(EnsureOutcome::Registered),
            // listed without it but the id is taken: undecodable or racing
            Err(StoreError::Rejected { status: 409, .. }) => {
                info!(subscription = id, "Subscription id taken; replacing");
                self.store.delete_subscription(id).await?;
                self.store.create_subscription(id, intent).await?;
                Ok(EnsureOutcome::Replaced)
            }
            Err(e) => Err(e),
        }
    }
}
