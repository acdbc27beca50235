use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use tracing::debug;

use projector_events::Position;

use super::{Checkpoint, CheckpointError, CheckpointStore};

#[derive(Debug, Default)]
struct Ledger {
    tracked: BTreeSet<String>,
    checkpoints: BTreeMap<String, Checkpoint>,
}

/// Monotonic per-projection position ledger.
///
/// Writes go through to the [`CheckpointStore`] first and are cached only once
/// durable; reads are served from the cache. Each projection is the single
/// writer of its own checkpoint.
pub struct CheckpointTracker {
    store: Arc<dyn CheckpointStore>,
    ledger: RwLock<Ledger>,
}

impl CheckpointTracker {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            ledger: RwLock::new(Ledger::default()),
        }
    }

    /// Register a projection whose checkpoint counts for
    /// [`Self::is_projected_by_all`], loading its stored checkpoint.
    pub fn track(&self, projection: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let stored = self.store.get(projection)?;
        let mut ledger = self.ledger.write().map_err(|_| CheckpointError::Poisoned)?;
        ledger.tracked.insert(projection.to_string());
        if let Some(checkpoint) = &stored {
            ledger.checkpoints.insert(projection.to_string(), checkpoint.clone());
        }
        Ok(stored)
    }

    pub fn checkpoint(&self, projection: &str) -> Option<Checkpoint> {
        self.ledger
            .read()
            .ok()
            .and_then(|ledger| ledger.checkpoints.get(projection).cloned())
    }

    /// Latest durable position of a projection (`Position::START` when it has
    /// never advanced).
    pub fn current_position(&self, projection: &str) -> Position {
        self.checkpoint(projection)
            .map(|c| c.current)
            .unwrap_or(Position::START)
    }

    /// Positions of every tracked projection.
    pub fn all_positions(&self) -> BTreeMap<String, Position> {
        match self.ledger.read() {
            Ok(ledger) => ledger
                .tracked
                .iter()
                .map(|name| {
                    let position = ledger
                        .checkpoints
                        .get(name)
                        .map(|c| c.current)
                        .unwrap_or(Position::START);
                    (name.clone(), position)
                })
                .collect(),
            Err(_) => BTreeMap::new(),
        }
    }

    /// Persist `position` for `projection`. Recording the current position again
    /// is allowed (and refreshes the signature); moving backwards is not.
    pub fn record_position(
        &self,
        projection: &str,
        signature: &str,
        position: Position,
    ) -> Result<Checkpoint, CheckpointError> {
        let current = self.current_position(projection);
        if position < current {
            return Err(CheckpointError::Regression {
                projection: projection.to_string(),
                current,
                attempted: position,
            });
        }

        let checkpoint = Checkpoint::new(projection, signature, position);
        self.store.set(&checkpoint)?;

        let mut ledger = self.ledger.write().map_err(|_| CheckpointError::Poisoned)?;
        ledger.tracked.insert(projection.to_string());
        ledger.checkpoints.insert(projection.to_string(), checkpoint.clone());
        drop(ledger);

        debug!(projection, %position, "checkpoint advanced");
        Ok(checkpoint)
    }

    pub fn is_caught_up(&self, projection: &str, position: Position) -> bool {
        self.current_position(projection) >= position
    }

    /// True iff every tracked projection has applied `position`.
    pub fn is_projected_by_all(&self, position: Position) -> bool {
        self.all_positions().values().all(|current| *current >= position)
    }
}

impl core::fmt::Debug for CheckpointTracker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CheckpointTracker")
            .field("positions", &self.all_positions())
            .finish()
    }
}
