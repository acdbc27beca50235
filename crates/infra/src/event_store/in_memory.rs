use std::collections::HashSet;
use std::sync::RwLock;

use chrono::Utc;

use projector_core::MessageId;
use projector_events::{Commit, DomainEvent, Position};

use super::r#trait::{EventStore, EventStoreError};

#[derive(Debug, Default)]
struct Log {
    commits: Vec<Commit>,
    message_ids: HashSet<MessageId>,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. Commit `n` lives at index `n - 1`.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    log: RwLock<Log>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit_count(&self) -> usize {
        self.log.read().map(|log| log.commits.len()).unwrap_or_default()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&self, events: Vec<DomainEvent>) -> Result<Commit, EventStoreError> {
        if events.is_empty() {
            return Err(EventStoreError::EmptyCommit);
        }

        let mut log = self.log.write().map_err(|_| EventStoreError::Poisoned)?;

        let mut seen = HashSet::with_capacity(events.len());
        for e in &events {
            let id = e.message_id();
            if log.message_ids.contains(&id) || !seen.insert(id) {
                return Err(EventStoreError::DuplicateMessage(id));
            }
        }

        let position = Position::new(log.commits.len() as u64 + 1);
        let commit = Commit::new(position, Utc::now(), events);
        log.message_ids.extend(seen);
        log.commits.push(commit.clone());
        Ok(commit)
    }

    fn commits_after(&self, position: Position, limit: usize) -> Result<Vec<Commit>, EventStoreError> {
        let log = self.log.read().map_err(|_| EventStoreError::Poisoned)?;
        let start = usize::try_from(position.value()).unwrap_or(usize::MAX);
        Ok(log.commits.iter().skip(start).take(limit).cloned().collect())
    }

    fn head(&self) -> Result<Position, EventStoreError> {
        let log = self.log.read().map_err(|_| EventStoreError::Poisoned)?;
        Ok(Position::new(log.commits.len() as u64))
    }
}
