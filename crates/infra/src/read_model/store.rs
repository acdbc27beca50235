//! Read model store boundary.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ReadModel;

/// Result of a plain insert.
///
/// A duplicate key is a structured signal, not an error: the write gateway
/// decides whether it is an idempotent redelivery or a genuine conflict.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    DuplicateKey,
}

/// Result of a version-checked update.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// The stored version differs from the expected one (`None`: the document
    /// no longer exists).
    VersionMismatch { actual: Option<u64> },
}

/// Index definition passed through to the backing store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new<I, F>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Read model storage failure (anything other than duplicate/version signals).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("read model store unavailable: {0}")]
    Unavailable(String),

    #[error("read model store rejected write: {0}")]
    Rejected(String),

    #[error("read model serialization failed: {0}")]
    Serialization(String),

    #[error("read model store lock poisoned")]
    Poisoned,
}

/// Keyed document storage for one read model type.
///
/// Implementations must:
/// - report duplicate keys on `insert` via [`InsertOutcome::DuplicateKey`]
/// - apply `conditional_update` only when the stored version equals
///   `expected_version` (compare-and-swap)
/// - return `query`/`all` results ordered by key
/// - make every write durable once `flush` returns
pub trait ReadModelStore<M: ReadModel>: Send + Sync {
    fn find_by_id(&self, id: &M::Key) -> Result<Option<M>, StoreError>;

    fn query(&self, filter: &dyn Fn(&M) -> bool) -> Result<Vec<M>, StoreError>;

    fn all(&self) -> Result<Vec<M>, StoreError> {
        self.query(&|_| true)
    }

    fn insert(&self, doc: &M) -> Result<InsertOutcome, StoreError>;

    fn insert_batch(&self, docs: Vec<M>) -> Result<(), StoreError>;

    fn conditional_update(&self, doc: &M, expected_version: u64) -> Result<UpdateOutcome, StoreError>;

    /// Remove a document; returns the number of documents affected.
    fn delete(&self, id: &M::Key) -> Result<u64, StoreError>;

    /// Remove every document (rebuild support).
    fn drop_all(&self) -> Result<(), StoreError>;

    fn flush(&self) -> Result<(), StoreError>;

    fn create_index(&self, spec: IndexSpec) -> Result<(), StoreError>;

    fn index_exists(&self, spec: &IndexSpec) -> Result<bool, StoreError>;
}

impl<M, S> ReadModelStore<M> for Arc<S>
where
    M: ReadModel,
    S: ReadModelStore<M> + ?Sized,
{
    fn find_by_id(&self, id: &M::Key) -> Result<Option<M>, StoreError> {
        (**self).find_by_id(id)
    }

    fn query(&self, filter: &dyn Fn(&M) -> bool) -> Result<Vec<M>, StoreError> {
        (**self).query(filter)
    }

    fn all(&self) -> Result<Vec<M>, StoreError> {
        (**self).all()
    }

    fn insert(&self, doc: &M) -> Result<InsertOutcome, StoreError> {
        (**self).insert(doc)
    }

    fn insert_batch(&self, docs: Vec<M>) -> Result<(), StoreError> {
        (**self).insert_batch(docs)
    }

    fn conditional_update(&self, doc: &M, expected_version: u64) -> Result<UpdateOutcome, StoreError> {
        (**self).conditional_update(doc, expected_version)
    }

    fn delete(&self, id: &M::Key) -> Result<u64, StoreError> {
        (**self).delete(id)
    }

    fn drop_all(&self) -> Result<(), StoreError> {
        (**self).drop_all()
    }

    fn flush(&self) -> Result<(), StoreError> {
        (**self).flush()
    }

    fn create_index(&self, spec: IndexSpec) -> Result<(), StoreError> {
        (**self).create_index(spec)
    }

    fn index_exists(&self, spec: &IndexSpec) -> Result<bool, StoreError> {
        (**self).index_exists(spec)
    }
}
