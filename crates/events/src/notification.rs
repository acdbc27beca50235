//! Change notifications produced by read-model writes.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// What happened to a read model.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Created,
    Updated,
    Deleted,
}

/// Notification published after a read-model write is durable.
///
/// `model` carries the (optionally transformed) snapshot for Created/Updated.
/// `topics` is only set on Deleted, when the read model type exposes topics;
/// it is the routing information left once the document is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadModelUpdatedMessage {
    pub model_type: String,
    pub key: JsonValue,
    pub kind: UpdateKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
}

impl ReadModelUpdatedMessage {
    pub fn created(model_type: impl Into<String>, key: JsonValue, model: JsonValue) -> Self {
        Self {
            model_type: model_type.into(),
            key,
            kind: UpdateKind::Created,
            model: Some(model),
            topics: None,
        }
    }

    pub fn updated(model_type: impl Into<String>, key: JsonValue, model: JsonValue) -> Self {
        Self {
            model_type: model_type.into(),
            key,
            kind: UpdateKind::Updated,
            model: Some(model),
            topics: None,
        }
    }

    pub fn deleted(model_type: impl Into<String>, key: JsonValue, topics: Option<Vec<String>>) -> Self {
        Self {
            model_type: model_type.into(),
            key,
            kind: UpdateKind::Deleted,
            model: None,
            topics,
        }
    }

    /// Whether a topic-scoped subscriber should receive this message.
    pub fn has_topic(&self, topic: &str) -> bool {
        self.topics
            .as_deref()
            .is_some_and(|topics| topics.iter().any(|t| t == topic))
    }
}
