use std::sync::Arc;

use thiserror::Error;

use projector_core::MessageId;
use projector_events::{Commit, DomainEvent, Position};

/// Event store operation error.
///
/// These are infrastructure errors; the dispatch engine surfaces them as a
/// failed cycle for the projection that was reading.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    #[error("cannot append an empty commit")]
    EmptyCommit,

    #[error("message {0} was already appended")]
    DuplicateMessage(MessageId),

    #[error("event store unavailable: {0}")]
    Unavailable(String),

    #[error("event store lock poisoned")]
    Poisoned,
}

/// Append-only, globally ordered log of commits.
///
/// ## Positions
///
/// Every successful `append` produces one [`Commit`] at the next position
/// (`head().next()`). Positions are strictly increasing and never reused, so a
/// position is a resumable cursor: `commits_after(p, ..)` returns exactly the
/// commits a reader that has applied everything up to `p` still needs.
///
/// ## Implementation Requirements
///
/// - a commit is persisted atomically (all of its events or none)
/// - `commits_after` returns commits in ascending position order
/// - message ids are unique across the whole log
pub trait EventStore: Send + Sync {
    /// Append a batch of events as one commit.
    fn append(&self, events: Vec<DomainEvent>) -> Result<Commit, EventStoreError>;

    /// Up to `limit` commits strictly after `position`, oldest first.
    fn commits_after(&self, position: Position, limit: usize) -> Result<Vec<Commit>, EventStoreError>;

    /// Position of the latest commit (`Position::START` for an empty log).
    fn head(&self) -> Result<Position, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(&self, events: Vec<DomainEvent>) -> Result<Commit, EventStoreError> {
        (**self).append(events)
    }

    fn commits_after(&self, position: Position, limit: usize) -> Result<Vec<Commit>, EventStoreError> {
        (**self).commits_after(position, limit)
    }

    fn head(&self) -> Result<Position, EventStoreError> {
        (**self).head()
    }
}
