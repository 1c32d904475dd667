//! Subscription intents and their registration with the entity store.

mod intent;
mod manager;

pub use intent::{subscription_id, EntitySelector, SubscriptionIntent, SUBSCRIPTION_PREFIX};
pub use manager::{EnsureOutcome, IntentState, SubscriptionManager};

/// A subscription as listed by the store.
#[derive(Debug, Clone)]
pub struct StoredSubscription {
    pub id: String,
    pub intent: SubscriptionIntent,
}
