//! Projection checkpoints.
//!
//! A checkpoint is the last stream position a projection has fully applied,
//! keyed by projection name and tagged with the projection's signature. It is
//! what makes dispatch resumable:
//! - after a crash a projection continues from `current`
//! - commits at or before `current` are never re-read by dispatch
//! - a rebuild publishes a fresh checkpoint only once replay and flush succeed
//!
//! Positions never regress. Stores reject a write that would move a checkpoint
//! backwards ([`CheckpointError::Regression`]).

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod tracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use projector_events::Position;

pub use in_memory::InMemoryCheckpointStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresCheckpointStore;
pub use tracker::CheckpointTracker;

/// Durable cursor of one projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub projection: String,
    /// Signature of the projection logic that produced `current`.
    pub signature: String,
    pub current: Position,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(projection: impl Into<String>, signature: impl Into<String>, current: Position) -> Self {
        Self {
            projection: projection.into(),
            signature: signature.into(),
            current,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("checkpoint of {projection} cannot move back from {current} to {attempted}")]
    Regression {
        projection: String,
        current: Position,
        attempted: Position,
    },

    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),

    #[error("checkpoint store lock poisoned")]
    Poisoned,
}

/// Durable keyed ledger of checkpoints.
pub trait CheckpointStore: Send + Sync {
    fn get(&self, projection: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Insert or advance a checkpoint; must fail with `Regression` instead of
    /// moving an existing checkpoint backwards.
    fn set(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    fn all(&self) -> Result<Vec<Checkpoint>, CheckpointError>;
}

impl<S> CheckpointStore for std::sync::Arc<S>
where
    S: CheckpointStore + ?Sized,
{
    fn get(&self, projection: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        (**self).get(projection)
    }

    fn set(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        (**self).set(checkpoint)
    }

    fn all(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        (**self).all()
    }
}
