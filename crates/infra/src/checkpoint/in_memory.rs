use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{Checkpoint, CheckpointError, CheckpointStore};

/// In-memory checkpoint store (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<BTreeMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn get(&self, projection: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let checkpoints = self.checkpoints.read().map_err(|_| CheckpointError::Poisoned)?;
        Ok(checkpoints.get(projection).cloned())
    }

    fn set(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let mut checkpoints = self.checkpoints.write().map_err(|_| CheckpointError::Poisoned)?;
        if let Some(existing) = checkpoints.get(&checkpoint.projection) {
            if existing.current > checkpoint.current {
                return Err(CheckpointError::Regression {
                    projection: checkpoint.projection.clone(),
                    current: existing.current,
                    attempted: checkpoint.current,
                });
            }
        }
        checkpoints.insert(checkpoint.projection.clone(), checkpoint.clone());
        Ok(())
    }

    fn all(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let checkpoints = self.checkpoints.read().map_err(|_| CheckpointError::Poisoned)?;
        Ok(checkpoints.values().cloned().collect())
    }
}
