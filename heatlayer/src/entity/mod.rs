//! Entity model: the records that coordinate pipeline stages.
//!
//! Layers and predictions are addressed by NGSI-LD URNs and exchanged
//! with the entity store in normalized NGSI-LD form.

mod id;
mod layer;
mod ngsi;
mod notification;
mod prediction;

pub use id::{Area, EntityId, EntityType, URN_PREFIX};
pub use layer::{GeospatialLayer, LayerKind};
pub use ngsi::{Entity, NGSI_LD_CONTEXT};
pub use notification::{EntityRef, NotificationEvent};
pub use prediction::{PredictionEntity, ValueRange, HEAT_MAP_LAYER};

use thiserror::Error;

/// Errors decoding or validating entities.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntityError {
    #[error("invalid entity id '{0}': expected urn:ngsi-ld:<Type>:<name>")]
    InvalidId(String),

    #[error("unknown entity type '{0}'")]
    UnknownType(String),

    #[error("unknown layer type '{0}'")]
    UnknownLayerType(String),

    #[error("entity {id} has no {attribute} attribute")]
    MissingAttribute { id: String, attribute: &'static str },

    #[error("entity {id} attribute {attribute} is malformed: {reason}")]
    MalformedAttribute {
        id: String,
        attribute: &'static str,
        reason: String,
    },
}
