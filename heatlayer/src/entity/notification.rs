//! Change notifications delivered by the entity store.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ngsi::Entity;
use super::EntityError;

/// NGSI-LD notification body.
///
/// `data` is kept as raw JSON: the watch-list check needs only `id` and
/// `type`, while entities are decoded on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notified_at: Option<String>,
    #[serde(default)]
    pub data: Vec<Value>,
}

/// Identity of one changed entity as carried in a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub id: String,
    pub entity_type: String,
}

impl NotificationEvent {
    /// Notification carrying the given entities.
    pub fn for_entities<'a>(
        subscription_id: impl Into<String>,
        entities: impl IntoIterator<Item = &'a Entity>,
    ) -> Self {
        let subscription_id = subscription_id.into();
        let notified_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        Self {
            id: Some(format!("urn:ngsi-ld:Notification:{}", notified_at)),
            kind: Some("Notification".to_string()),
            subscription_id: Some(subscription_id),
            notified_at: Some(notified_at),
            data: entities.into_iter().map(Entity::to_ngsi_ld).collect(),
        }
    }

    /// `id`/`type` pairs of the entities in the payload.
    pub fn entity_refs(&self) -> Vec<EntityRef> {
        self.data
            .iter()
            .filter_map(|item| {
                let id = item.get("id")?.as_str()?;
                let entity_type = item.get("type").and_then(Value::as_str).unwrap_or_default();
                Some(EntityRef {
                    id: id.to_string(),
                    entity_type: entity_type.to_string(),
                })
            })
            .collect()
    }

    /// Decodes every entity in the payload.
    pub fn entities(&self) -> Vec<Result<Entity, EntityError>> {
        self.data.iter().map(Entity::from_ngsi_ld).collect()
    }
}
