//! Read model documents and the storage boundary they live behind.
//!
//! A read model is a disposable, denormalized document owned by exactly one
//! projection. Besides its domain fields it carries bookkeeping used by the
//! write path ([`ReadModelMeta`]):
//!
//! - `version`: starts at 1 on insert, bumped on every save, and used as the
//!   compare-and-swap token for conditional updates
//! - `last_modified`: commit stamp of the last event applied
//! - `processed_events`: the message ids the document was built from, which
//!   makes redelivery of an already-applied event a no-op

pub mod in_memory;
pub mod store;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use projector_core::MessageId;

pub use in_memory::InMemoryReadModelStore;
pub use store::{IndexSpec, InsertOutcome, ReadModelStore, StoreError, UpdateOutcome};

/// Write-path bookkeeping embedded in every read model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadModelMeta {
    pub version: u64,
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processed_events: Vec<MessageId>,
}

impl ReadModelMeta {
    /// Whether the document already reflects the given message.
    pub fn built_from(&self, message_id: &MessageId) -> bool {
        self.processed_events.contains(message_id)
    }

    /// Record a message id; the set only ever grows.
    pub fn record(&mut self, message_id: MessageId) {
        if !self.built_from(&message_id) {
            self.processed_events.push(message_id);
        }
    }
}

/// A document a [`crate::collection::CollectionWrapper`] can write.
pub trait ReadModel: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Application-defined key. Its ordering is the stable iteration order
    /// used by filtered bulk updates.
    type Key: Clone + Ord + core::hash::Hash + core::fmt::Debug + Serialize + Send + Sync + 'static;

    /// Collection name (table, collection, key prefix...).
    const COLLECTION: &'static str;

    fn id(&self) -> &Self::Key;

    fn set_id(&mut self, id: Self::Key);

    fn meta(&self) -> &ReadModelMeta;

    fn meta_mut(&mut self) -> &mut ReadModelMeta;

    fn version(&self) -> u64 {
        self.meta().version
    }

    fn built_from_event(&self, message_id: &MessageId) -> bool {
        self.meta().built_from(message_id)
    }
}

/// Capability for read models whose notifications are routed by topic.
///
/// Only types that need topic routing implement this; the collection wrapper
/// picks it up at composition time via `CollectionWrapper::with_topics`.
pub trait TopicsProvider {
    fn topics(&self) -> Vec<String>;
}
