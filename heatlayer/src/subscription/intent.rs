//! Declarative subscription descriptions.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::entity::{EntityId, EntityType, NGSI_LD_CONTEXT};

/// Prefix of subscription URNs registered by this service.
pub const SUBSCRIPTION_PREFIX: &str = "urn:ngsi-ld:Subscription:";

/// Entities a subscription covers: all of one type, or one id of that type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntitySelector {
    pub entity_type: EntityType,
    pub id: Option<EntityId>,
}

impl EntitySelector {
    pub fn of_type(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            id: None,
        }
    }

    pub fn of_id(entity_type: EntityType, id: EntityId) -> Self {
        Self {
            entity_type,
            id: Some(id),
        }
    }

    /// True if an entity with this type and id falls under the selector.
    pub fn admits(&self, entity_type: &str, id: &str) -> bool {
        let type_matches = entity_type
            .parse::<EntityType>()
            .map(|t| t == self.entity_type)
            .unwrap_or(false);
        type_matches && self.id.as_ref().map_or(true, |want| want.as_str() == id)
    }
}

/// What a stage wants to be told about.
///
/// Two intents are equivalent when selectors, watched attributes and
/// endpoint agree; the description is informational only.
#[derive(Debug, Clone)]
pub struct SubscriptionIntent {
    selectors: BTreeSet<EntitySelector>,
    watched: BTreeSet<String>,
    endpoint: String,
    description: String,
}

impl SubscriptionIntent {
    pub fn new(
        selectors: impl IntoIterator<Item = EntitySelector>,
        watched: impl IntoIterator<Item = impl Into<String>>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            selectors: selectors.into_iter().collect(),
            watched: watched.into_iter().map(Into::into).collect(),
            endpoint: endpoint.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn selectors(&self) -> impl Iterator<Item = &EntitySelector> {
        self.selectors.iter()
    }

    pub fn watched_attributes(&self) -> impl Iterator<Item = &str> {
        self.watched.iter().map(String::as_str)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Structural equality, ignoring the description.
    pub fn equivalent(&self, other: &SubscriptionIntent) -> bool {
        self.selectors == other.selectors
            && self.watched == other.watched
            && self.endpoint == other.endpoint
    }

    /// Watch-list check: true if any selector covers the entity.
    pub fn admits(&self, entity_type: &str, id: &str) -> bool {
        self.selectors.iter().any(|s| s.admits(entity_type, id))
    }

    /// True if a change to `changed` attributes of this entity should notify.
    pub fn matches<'a>(
        &self,
        entity_type: &str,
        id: &str,
        changed: impl IntoIterator<Item = &'a str>,
    ) -> bool {
        self.admits(entity_type, id)
            && (self.watched.is_empty() || changed.into_iter().any(|a| self.watched.contains(a)))
    }

    /// NGSI-LD subscription payload.
    pub fn to_ngsi_ld(&self, id: &str) -> Value {
        let entities: Vec<Value> = self
            .selectors
            .iter()
            .map(|s| match &s.id {
                Some(id) => json!({ "id": id.as_str(), "type": s.entity_type.as_str() }),
                None => json!({ "type": s.entity_type.as_str() }),
            })
            .collect();
        let mut body = json!({
            "id": id,
            "type": "Subscription",
            "entities": entities,
            "watchedAttributes": self.watched.iter().collect::<Vec<_>>(),
            "notification": {
                "endpoint": {
                    "uri": self.endpoint,
                    "accept": "application/json",
                },
            },
            "@context": [NGSI_LD_CONTEXT],
        });
        if !self.description.is_empty() {
            body["description"] = Value::String(self.description.clone());
        }
        body
    }

    /// Decodes a subscription as returned by the store.
    ///
    /// Returns `None` for subscriptions this service cannot have written.
    pub fn from_ngsi_ld(value: &Value) -> Option<(String, Self)> {
        let id = value.get("id")?.as_str()?.to_string();
        let selectors = value
            .get("entities")?
            .as_array()?
            .iter()
            .map(|e| {
                let entity_type = e.get("type")?.as_str()?.parse::<EntityType>().ok()?;
                match e.get("id").and_then(Value::as_str) {
                    Some(raw) => Some(EntitySelector::of_id(entity_type, EntityId::parse(raw).ok()?)),
                    None => Some(EntitySelector::of_type(entity_type)),
                }
            })
            .collect::<Option<BTreeSet<_>>>()?;
        let watched = value
            .get("watchedAttributes")
            .and_then(Value::as_array)
            .map(|attrs| {
                attrs
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let endpoint = value
            .get("notification")?
            .get("endpoint")?
            .get("uri")?
            .as_str()?
            .to_string();
        let description = value
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some((
            id,
            Self {
                selectors,
                watched,
                endpoint,
                description,
            },
        ))
    }
}

/// Subscription id for a named stage.
pub fn subscription_id(stage: &str) -> String {
    format!("{}heatlayer-{}", SUBSCRIPTION_PREFIX, stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Area, LayerKind};
    use proptest::prelude::*;

    fn index_intent() -> SubscriptionIntent {
        let area = Area::new("brussels", "2024");
        SubscriptionIntent::new(
            [
                EntitySelector::of_id(EntityType::GeoSpatialLayer, EntityId::for_layer("RGB", &area)),
                EntitySelector::of_id(EntityType::GeoSpatialLayer, EntityId::for_layer("NIR", &area)),
            ],
            ["filePath"],
            "http://index:8000/react",
        )
    }

    #[test]
    fn test_equivalence_ignores_order_and_description() {
        let a = index_intent();
        let area = Area::new("brussels", "2024");
        let b = SubscriptionIntent::new(
            [
                EntitySelector::of_id(EntityType::GeoSpatialLayer, EntityId::for_layer("NIR", &area)),
                EntitySelector::of_id(EntityType::GeoSpatialLayer, EntityId::for_layer("RGB", &area)),
            ],
            ["filePath", "filePath"],
            "http://index:8000/react",
        )
        .with_description("index stage");
        assert!(a.equivalent(&b));

        let c = SubscriptionIntent::new(a.selectors().cloned(), ["filePath"], "http://other/react");
        assert!(!a.equivalent(&c));
    }

    #[test]
    fn test_payload_decodes_to_equivalent_intent() {
        let intent = index_intent().with_description("index stage");
        let id = subscription_id("index");
        let (decoded_id, decoded) = SubscriptionIntent::from_ngsi_ld(&intent.to_ngsi_ld(&id)).unwrap();
        assert_eq!(decoded_id, "urn:ngsi-ld:Subscription:heatlayer-index");
        assert!(decoded.equivalent(&intent));
        assert_eq!(decoded.description(), "index stage");
    }

    #[test]
    fn test_type_selector_payload() {
        let intent = SubscriptionIntent::new(
            [EntitySelector::of_type(EntityType::UhiHeatMap)],
            ["publishToGeoserver", "filePath"],
            "http://publication:8000/react",
        );
        let body = intent.to_ngsi_ld("urn:ngsi-ld:Subscription:x");
        assert_eq!(body["entities"][0], json!({"type": "UHIHeatMap"}));
        assert_eq!(body["watchedAttributes"], json!(["filePath", "publishToGeoserver"]));
        assert_eq!(body["notification"]["endpoint"]["accept"], "application/json");
    }

    #[test]
    fn test_matches_requires_watched_change() {
        let intent = index_intent();
        let rgb = "urn:ngsi-ld:GeoSpatialLayer:RGB:brussels:2024";
        assert!(intent.matches("GeoSpatialLayer", rgb, ["filePath"]));
        assert!(!intent.matches("GeoSpatialLayer", rgb, ["name"]));
        assert!(!intent.matches(
            "GeoSpatialLayer",
            "urn:ngsi-ld:GeoSpatialLayer:NDVI:brussels:2024",
            ["filePath"]
        ));
    }

    proptest! {
        /// Only ids named by the intent pass the watch-list.
        #[test]
        fn prop_scoped_admission(kind in 0usize..4, vintage in 2000u32..2100) {
            let area = Area::new("brussels", vintage.to_string());
            let watched = Area::new("brussels", "2024");
            let intent = SubscriptionIntent::new(
                [EntitySelector::of_id(EntityType::GeoSpatialLayer, EntityId::for_layer("NIR", &watched))],
                ["filePath"],
                "http://x/react",
            );
            let kind = LayerKind::ALL[kind];
            let id = EntityId::for_layer(kind.tag(), &area);
            let expected = kind == LayerKind::Nir && vintage == 2024;
            prop_assert_eq!(intent.admits("GeoSpatialLayer", id.as_str()), expected);
            prop_assert!(!intent.admits("UHIHeatMap", id.as_str()));
        }
    }
}
