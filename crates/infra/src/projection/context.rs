use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use crate::collection::{CollectionError, CollectionWrapper};
use crate::read_model::{ReadModel, ReadModelStore};

use super::{ObserveProjection, ProjectionStatus};

/// Identity, subscriptions and owned storage of one projection.
pub struct ProjectionContext {
    name: String,
    signature: String,
    subscriptions: BTreeSet<String>,
    status: ProjectionStatus,
    observers: RwLock<Vec<Arc<dyn ObserveProjection>>>,
}

impl ProjectionContext {
    /// `name` keys the checkpoint; `signature` tags the projection's logic so a
    /// changed projection can be detected against its stored checkpoint.
    pub fn new(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signature: signature.into(),
            subscriptions: BTreeSet::new(),
            status: ProjectionStatus::new(),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe_to(mut self, event_type: impl Into<String>) -> Self {
        self.subscriptions.insert(event_type.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn status(&self) -> &ProjectionStatus {
        &self.status
    }

    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.subscriptions.contains(event_type)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(String::as_str)
    }

    /// Bind a collection wrapper to this projection and observe it.
    ///
    /// A wrapper can be attached once; `notifications` is its standing
    /// notification flag.
    pub fn attach<M, S>(
        &self,
        collection: &Arc<CollectionWrapper<M, S>>,
        notifications: bool,
    ) -> Result<(), CollectionError>
    where
        M: ReadModel,
        S: ReadModelStore<M> + 'static,
    {
        collection.bind(&self.name, self.status.clone(), notifications)?;
        self.observe(collection.clone());
        Ok(())
    }

    pub fn observe(&self, observer: Arc<dyn ObserveProjection>) {
        match self.observers.write() {
            Ok(mut observers) => observers.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    pub fn observers(&self) -> Vec<Arc<dyn ObserveProjection>> {
        match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl core::fmt::Debug for ProjectionContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProjectionContext")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("subscriptions", &self.subscriptions)
            .field("mode", &self.status.mode())
            .field("observers", &self.observers().len())
            .finish()
    }
}
