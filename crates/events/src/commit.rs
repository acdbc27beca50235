//! Commits and stream positions.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use projector_core::DomainError;

use crate::DomainEvent;

/// Resumable, totally-ordered token into the global event stream.
///
/// Positions are assigned by the event store, one per commit. `Position::START`
/// sits before the first commit: reading "after START" yields the whole stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(u64);

impl Position {
    /// Sentinel before the first commit.
    pub const START: Position = Position(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// The position immediately after this one.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn is_start(self) -> bool {
        self == Self::START
    }
}

impl core::fmt::Display for Position {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Position {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|e| DomainError::validation(format!("position '{s}': {e}")))
    }
}

impl From<u64> for Position {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A batch of events appended atomically at one stream position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub position: Position,
    pub committed_at: DateTime<Utc>,
    pub events: Vec<DomainEvent>,
}

impl Commit {
    pub fn new(position: Position, committed_at: DateTime<Utc>, events: Vec<DomainEvent>) -> Self {
        Self {
            position,
            committed_at,
            events,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
