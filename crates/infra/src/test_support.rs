//! Fixtures shared by unit and integration tests.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use projector_core::{AggregateId, MessageId};
use projector_events::{DomainEvent, Event, ReadModelUpdatedMessage};

use crate::collection::CollectionWrapper;
use crate::notify::NotifyToSubscribers;
use crate::projection::{Projection, ProjectionContext, ProjectionError};
use crate::read_model::{InMemoryReadModelStore, ReadModel, ReadModelMeta, TopicsProvider};

pub const SAMPLE_CREATED: &str = "SampleCreated";
pub const SAMPLE_RENAMED: &str = "SampleRenamed";
pub const SAMPLE_DELETED: &str = "SampleDeleted";
pub const SAMPLE_REJECTED: &str = "SampleRejected";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleReadModel {
    pub id: String,
    pub meta: ReadModelMeta,
    pub name: String,
    pub topics: Vec<String>,
    pub renames: u32,
}

impl SampleReadModel {
    pub fn named(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            meta: ReadModelMeta::default(),
            name: name.to_string(),
            topics: Vec::new(),
            renames: 0,
        }
    }

    pub fn with_topics(mut self, topics: &[&str]) -> Self {
        self.topics = topics.iter().map(|t| t.to_string()).collect();
        self
    }
}

impl ReadModel for SampleReadModel {
    type Key = String;

    const COLLECTION: &'static str = "samples";

    fn id(&self) -> &String {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn meta(&self) -> &ReadModelMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ReadModelMeta {
        &mut self.meta
    }
}

impl TopicsProvider for SampleReadModel {
    fn topics(&self) -> Vec<String> {
        self.topics.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleCreated {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub topics: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRenamed {
    pub id: String,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleDeleted {
    pub id: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRejected {
    pub occurred_at: DateTime<Utc>,
}

macro_rules! sample_event {
    ($ty:ident, $name:expr) => {
        impl Event for $ty {
            fn event_type(&self) -> &'static str {
                $name
            }

            fn version(&self) -> u32 {
                1
            }

            fn occurred_at(&self) -> DateTime<Utc> {
                self.occurred_at
            }
        }
    };
}

sample_event!(SampleCreated, SAMPLE_CREATED);
sample_event!(SampleRenamed, SAMPLE_RENAMED);
sample_event!(SampleDeleted, SAMPLE_DELETED);
sample_event!(SampleRejected, SAMPLE_REJECTED);

fn wrap<E: Event + Serialize>(event: &E) -> DomainEvent {
    DomainEvent::from_typed(AggregateId::new(), "Sample", event).unwrap()
}

pub fn created(id: &str, name: &str) -> DomainEvent {
    created_with_topics(id, name, &[])
}

pub fn created_with_topics(id: &str, name: &str, topics: &[&str]) -> DomainEvent {
    wrap(&SampleCreated {
        id: id.to_string(),
        name: name.to_string(),
        topics: topics.iter().map(|t| t.to_string()).collect(),
        occurred_at: Utc::now(),
    })
}

pub fn renamed(id: &str, name: &str) -> DomainEvent {
    wrap(&SampleRenamed {
        id: id.to_string(),
        name: name.to_string(),
        occurred_at: Utc::now(),
    })
}

pub fn deleted(id: &str) -> DomainEvent {
    wrap(&SampleDeleted {
        id: id.to_string(),
        occurred_at: Utc::now(),
    })
}

pub fn rejected() -> DomainEvent {
    wrap(&SampleRejected { occurred_at: Utc::now() })
}

/// Same payload, different message id.
pub fn redelivered_as_new(event: &DomainEvent) -> DomainEvent {
    DomainEvent::new(
        MessageId::new(),
        event.aggregate_id(),
        event.aggregate_type(),
        event.event_type(),
        event.event_version(),
        event.commit_stamp(),
        event.payload().clone(),
    )
}

/// Keeps every notification it receives.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<ReadModelUpdatedMessage>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<ReadModelUpdatedMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

impl NotifyToSubscribers for RecordingNotifier {
    fn send(&self, message: ReadModelUpdatedMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

pub type SampleStore = Arc<InMemoryReadModelStore<SampleReadModel>>;
pub type SampleCollection = CollectionWrapper<SampleReadModel, SampleStore>;

/// Unattached wrapper over a fresh store.
pub fn sample_collection(notifier: Arc<RecordingNotifier>) -> (SampleStore, SampleCollection) {
    let store: SampleStore = Arc::new(InMemoryReadModelStore::new());
    let collection = CollectionWrapper::<SampleReadModel, _>::new(store.clone(), notifier).with_topics();
    (store, collection)
}

/// Projection over `samples`: create/rename/delete, and a rejected event that
/// always fails.
pub struct SampleProjection {
    context: ProjectionContext,
    pub samples: Arc<SampleCollection>,
    pub store: SampleStore,
}

impl SampleProjection {
    pub const NAME: &'static str = "Projection";

    pub fn new(notifier: Arc<RecordingNotifier>) -> Arc<Self> {
        Self::with_signature("v1", notifier)
    }

    pub fn with_signature(signature: &str, notifier: Arc<RecordingNotifier>) -> Arc<Self> {
        Self::build(Self::NAME, signature, notifier)
    }

    pub fn build(name: &str, signature: &str, notifier: Arc<RecordingNotifier>) -> Arc<Self> {
        let (store, samples) = sample_collection(notifier);
        let samples = Arc::new(samples);
        let context = ProjectionContext::new(name, signature)
            .subscribe_to(SAMPLE_CREATED)
            .subscribe_to(SAMPLE_RENAMED)
            .subscribe_to(SAMPLE_DELETED)
            .subscribe_to(SAMPLE_REJECTED);
        context.attach(&samples, true).unwrap();
        Arc::new(Self {
            context,
            samples,
            store,
        })
    }
}

impl Projection for SampleProjection {
    fn context(&self) -> &ProjectionContext {
        &self.context
    }

    fn handle(&self, event: &DomainEvent) -> Result<(), ProjectionError> {
        match event.event_type() {
            SAMPLE_CREATED => {
                let created: SampleCreated = event.decode().map_err(|e| ProjectionError::decode(event, e))?;
                let mut model = SampleReadModel::named(&created.id, &created.name);
                model.topics = created.topics;
                self.samples.insert(event, &mut model, false)?;
            }
            SAMPLE_RENAMED => {
                let renamed: SampleRenamed = event.decode().map_err(|e| ProjectionError::decode(event, e))?;
                self.samples.find_and_modify_by_id(
                    event,
                    &renamed.id,
                    |model| {
                        model.name = renamed.name.clone();
                        model.renames += 1;
                    },
                    false,
                )?;
            }
            SAMPLE_DELETED => {
                let deleted: SampleDeleted = event.decode().map_err(|e| ProjectionError::decode(event, e))?;
                self.samples.delete(event, &deleted.id, false)?;
            }
            SAMPLE_REJECTED => return Err(ProjectionError::handler("sample rejected")),
            _ => {}
        }
        Ok(())
    }
}
