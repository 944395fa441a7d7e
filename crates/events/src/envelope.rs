use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use authplane_core::{AggregateId, AggregateType, EventType, InstanceId, ResourceOwner};

/// The aggregate an event belongs to, with its tenancy scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub aggregate_type: AggregateType,
    pub id: AggregateId,
    pub instance_id: InstanceId,
    pub resource_owner: ResourceOwner,
}

impl Aggregate {
    pub fn new(
        aggregate_type: impl Into<AggregateType>,
        id: impl Into<AggregateId>,
        instance_id: impl Into<InstanceId>,
        resource_owner: impl Into<ResourceOwner>,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            id: id.into(),
            instance_id: instance_id.into(),
            resource_owner: resource_owner.into(),
        }
    }
}

/// Envelope for an event read from the append-only log.
///
/// This is the unit reducers consume. Envelopes are immutable facts:
/// - **Multi-tenancy** is carried by `instance_id` and `resource_owner`.
/// - **Ordering**: `sequence` is strictly increasing per aggregate;
///   `previous_sequence` is the sequence of the aggregate's prior event
///   (0 for the first one) and allows gap detection.
/// - `payload` is the event-type specific body, decoded on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    aggregate: Aggregate,
    event_type: EventType,

    sequence: u64,
    previous_sequence: u64,
    created_at: DateTime<Utc>,

    payload: JsonValue,
}

impl EventEnvelope {
    pub fn new(
        aggregate: Aggregate,
        event_type: impl Into<EventType>,
        sequence: u64,
        previous_sequence: u64,
        created_at: DateTime<Utc>,
        payload: JsonValue,
    ) -> Self {
        Self {
            aggregate,
            event_type: event_type.into(),
            sequence,
            previous_sequence,
            created_at,
            payload,
        }
    }

    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    pub fn aggregate_type(&self) -> &AggregateType {
        &self.aggregate.aggregate_type
    }

    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate.id
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.aggregate.instance_id
    }

    pub fn resource_owner(&self) -> &ResourceOwner {
        &self.aggregate.resource_owner
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn previous_sequence(&self) -> u64 {
        self.previous_sequence
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    /// Decode the payload into the typed body of this event type.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}
