//! Read side of a CQRS system: projections that keep denormalized read models
//! in step with an append-only event stream.
//!
//! - [`collection`]: the idempotent, version-checked write path for one read
//!   model type, plus change notifications
//! - [`projection`]: event-type routing and the Live/Rebuilding state
//! - [`checkpoint`]: durable, monotonic per-projection stream positions
//! - [`engine`]: the checkpoint-driven dispatch cycle
//! - [`rebuild`]: drop-and-replay reconstruction of a projection
//! - [`workers`]: background polling of the dispatch cycle

pub mod checkpoint;
pub mod collection;
pub mod config;
pub mod engine;
pub mod event_bus;
pub mod event_store;
pub mod notify;
pub mod projection;
pub mod read_model;
pub mod rebuild;
pub mod workers;

#[cfg(test)]
pub(crate) mod test_support;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore, CheckpointTracker, InMemoryCheckpointStore};
pub use collection::{CollectionError, CollectionWrapper, DeleteOutcome, WriteOutcome};
pub use config::{ConfigError, EngineConfig};
pub use engine::{ApplyFailure, CycleReport, DispatchError, ProjectionCycle, ProjectionEngine};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore};
pub use notify::{BusNotifier, NotifyToNobody, NotifyToSubscribers};
pub use projection::{ApplyOutcome, ObserveProjection, Projection, ProjectionContext, ProjectionError, ProjectionMode, ProjectionStatus};
pub use read_model::{InMemoryReadModelStore, ReadModel, ReadModelMeta, ReadModelStore, TopicsProvider};
pub use rebuild::{RebuildCoordinator, RebuildError, RebuildHandle, RebuildPhase, RebuildProgress};
pub use workers::DispatchWorker;
