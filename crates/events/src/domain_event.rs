use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use projector_core::{AggregateId, MessageId};

use crate::Event;

/// An immutable fact read from the event store.
///
/// Notes:
/// - `message_id` is unique per event and is the idempotency key read models
///   record once they have been built from this event.
/// - `commit_stamp` is the logical commit time; read models copy it into
///   `last_modified`.
/// - `payload` stays JSON so the dispatch path never needs to know the
///   concrete event types; projections decode what they subscribe to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    message_id: MessageId,
    aggregate_id: AggregateId,
    aggregate_type: String,

    event_type: String,
    event_version: u32,
    commit_stamp: DateTime<Utc>,

    payload: JsonValue,
}

impl DomainEvent {
    pub fn new(
        message_id: MessageId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        event_version: u32,
        commit_stamp: DateTime<Utc>,
        payload: JsonValue,
    ) -> Self {
        Self {
            message_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event_type.into(),
            event_version,
            commit_stamp,
            payload,
        }
    }

    /// Wrap a typed payload, assigning a fresh message id.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event: &E,
    ) -> Result<Self, serde_json::Error>
    where
        E: Event + Serialize,
    {
        Self::from_typed_with_id(MessageId::new(), aggregate_id, aggregate_type, event)
    }

    /// Wrap a typed payload under an explicit message id (redelivery, tests).
    pub fn from_typed_with_id<E>(
        message_id: MessageId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event: &E,
    ) -> Result<Self, serde_json::Error>
    where
        E: Event + Serialize,
    {
        let payload = serde_json::to_value(event)?;
        Ok(Self::new(
            message_id,
            aggregate_id,
            aggregate_type,
            event.event_type(),
            event.version(),
            event.occurred_at(),
            payload,
        ))
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    pub fn commit_stamp(&self) -> DateTime<Utc> {
        self.commit_stamp
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    /// Decode the JSON payload into a typed event.
    pub fn decode<E: DeserializeOwned>(&self) -> Result<E, serde_json::Error> {
        E::deserialize(&self.payload)
    }
}
