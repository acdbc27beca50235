use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use super::store::{IndexSpec, InsertOutcome, ReadModelStore, StoreError, UpdateOutcome};
use super::ReadModel;

/// In-memory read model store for tests/dev.
///
/// Documents are kept in key order, so `query`/`all` satisfy the ordering
/// contract for free. Writes are immediately visible; `flush` only counts calls.
#[derive(Debug)]
pub struct InMemoryReadModelStore<M: ReadModel> {
    docs: RwLock<BTreeMap<M::Key, M>>,
    indexes: RwLock<BTreeSet<IndexSpec>>,
    flushes: AtomicU64,
}

impl<M: ReadModel> InMemoryReadModelStore<M> {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            indexes: RwLock::new(BTreeSet::new()),
            flushes: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times `flush` was called.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

impl<M: ReadModel> Default for InMemoryReadModelStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: ReadModel> ReadModelStore<M> for InMemoryReadModelStore<M> {
    fn find_by_id(&self, id: &M::Key) -> Result<Option<M>, StoreError> {
        let docs = self.docs.read().map_err(|_| StoreError::Poisoned)?;
        Ok(docs.get(id).cloned())
    }

    fn query(&self, filter: &dyn Fn(&M) -> bool) -> Result<Vec<M>, StoreError> {
        let docs = self.docs.read().map_err(|_| StoreError::Poisoned)?;
        Ok(docs.values().filter(|d| filter(d)).cloned().collect())
    }

    fn insert(&self, doc: &M) -> Result<InsertOutcome, StoreError> {
        let mut docs = self.docs.write().map_err(|_| StoreError::Poisoned)?;
        if docs.contains_key(doc.id()) {
            return Ok(InsertOutcome::DuplicateKey);
        }
        docs.insert(doc.id().clone(), doc.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn insert_batch(&self, batch: Vec<M>) -> Result<(), StoreError> {
        let mut docs = self.docs.write().map_err(|_| StoreError::Poisoned)?;

        // All or nothing: reject the whole batch on the first clash.
        let mut seen = BTreeSet::new();
        for doc in &batch {
            if docs.contains_key(doc.id()) || !seen.insert(doc.id().clone()) {
                return Err(StoreError::Rejected(format!(
                    "duplicate key {:?} in batch insert into {}",
                    doc.id(),
                    M::COLLECTION
                )));
            }
        }

        for doc in batch {
            docs.insert(doc.id().clone(), doc);
        }
        Ok(())
    }

    fn conditional_update(&self, doc: &M, expected_version: u64) -> Result<UpdateOutcome, StoreError> {
        let mut docs = self.docs.write().map_err(|_| StoreError::Poisoned)?;
        match docs.get_mut(doc.id()) {
            Some(stored) if stored.version() == expected_version => {
                *stored = doc.clone();
                Ok(UpdateOutcome::Updated)
            }
            Some(stored) => Ok(UpdateOutcome::VersionMismatch {
                actual: Some(stored.version()),
            }),
            None => Ok(UpdateOutcome::VersionMismatch { actual: None }),
        }
    }

    fn delete(&self, id: &M::Key) -> Result<u64, StoreError> {
        let mut docs = self.docs.write().map_err(|_| StoreError::Poisoned)?;
        Ok(u64::from(docs.remove(id).is_some()))
    }

    fn drop_all(&self) -> Result<(), StoreError> {
        let mut docs = self.docs.write().map_err(|_| StoreError::Poisoned)?;
        docs.clear();
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn create_index(&self, spec: IndexSpec) -> Result<(), StoreError> {
        let mut indexes = self.indexes.write().map_err(|_| StoreError::Poisoned)?;
        indexes.insert(spec);
        Ok(())
    }

    fn index_exists(&self, spec: &IndexSpec) -> Result<bool, StoreError> {
        let indexes = self.indexes.read().map_err(|_| StoreError::Poisoned)?;
        Ok(indexes.contains(spec))
    }
}
