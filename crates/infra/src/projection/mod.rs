//! Projections: event-type routing plus the read models they own.
//!
//! A projection declares which event types it subscribes to and writes its read
//! models exclusively through [`crate::collection::CollectionWrapper`]s attached
//! to its [`ProjectionContext`]. The dispatch engine feeds it events in stream
//! order; the rebuild coordinator drives its Live/Rebuilding transitions.
//!
//! Handlers are not required to be idempotent themselves: every wrapper write
//! checks the message ids the target document was built from.

mod context;
mod status;

use thiserror::Error;

use projector_events::DomainEvent;

use crate::collection::CollectionError;

pub use context::ProjectionContext;
pub use status::{ProjectionMode, ProjectionStatus};

/// Failure while applying one event to a projection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error("failed to decode {event_type} payload: {message}")]
    Decode { event_type: String, message: String },

    #[error("projection handler failed: {0}")]
    Handler(String),
}

impl ProjectionError {
    pub fn decode(event: &DomainEvent, err: serde_json::Error) -> Self {
        Self::Decode {
            event_type: event.event_type().to_string(),
            message: err.to_string(),
        }
    }

    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }
}

/// Whether an event reached a handler.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Handled,
    /// The projection does not subscribe to this event type.
    Ignored,
}

/// Rebuild lifecycle hooks of something that stores a projection's state.
///
/// Implemented by collection wrappers; registered on the owning
/// [`ProjectionContext`] when they are attached.
pub trait ObserveProjection: Send + Sync {
    fn collection_name(&self) -> &'static str;

    /// Called before anything is dropped; fails if the observer is unusable.
    fn rebuild_started(&self) -> Result<(), CollectionError>;

    /// Clear all stored state.
    fn drop_collection(&self) -> Result<(), CollectionError>;

    /// Make every buffered write durable.
    fn rebuild_ended(&self) -> Result<(), CollectionError>;
}

/// Maps event types to read-model mutations.
pub trait Projection: Send + Sync {
    fn context(&self) -> &ProjectionContext;

    /// Apply one subscribed event. Only called for event types the context
    /// subscribes to.
    fn handle(&self, event: &DomainEvent) -> Result<(), ProjectionError>;

    fn name(&self) -> &str {
        self.context().name()
    }

    fn signature(&self) -> &str {
        self.context().signature()
    }

    fn is_rebuilding(&self) -> bool {
        self.context().status().is_rebuilding()
    }

    /// Route an event to `handle` if the projection subscribes to its type.
    fn apply(&self, event: &DomainEvent) -> Result<ApplyOutcome, ProjectionError> {
        if !self.context().subscribes_to(event.event_type()) {
            return Ok(ApplyOutcome::Ignored);
        }
        self.handle(event)?;
        Ok(ApplyOutcome::Handled)
    }
}
