//! The single write path into one read model type's storage.
//!
//! `CollectionWrapper` owns the write protocol every projection relies on:
//!
//! - **Idempotency**: each document records the message ids it was built from;
//!   re-applying one of them is a no-op (no version bump, no notification)
//! - **Optimistic concurrency**: saves are conditional on the version the
//!   writer read; a mismatch is reported, never retried here
//! - **Duplicate creation**: a duplicate key on insert is absorbed when the
//!   stored document was built from the same event, and is an invariant
//!   violation otherwise
//! - **Notifications**: published after the storage write, only while the
//!   owning projection is Live and notifications are requested
//!
//! A wrapper must be attached to its projection (see
//! [`ProjectionContext::attach`]) before it accepts writes.
//!
//! [`ProjectionContext::attach`]: crate::projection::ProjectionContext::attach

use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tracing::{debug, warn};

use projector_core::MessageId;
use projector_events::{DomainEvent, ReadModelUpdatedMessage, UpdateKind};

use crate::notify::NotifyToSubscribers;
use crate::projection::{ObserveProjection, ProjectionMode, ProjectionStatus};
use crate::read_model::{
    IndexSpec, InsertOutcome, ReadModel, ReadModelStore, StoreError, TopicsProvider, UpdateOutcome,
};

/// Hook run on a model right before an insert or save mutates it.
pub type OnSave<M> = Box<dyn Fn(&mut M, &DomainEvent) + Send + Sync>;

/// Transform applied to the snapshot carried by Created/Updated notifications.
pub type PrepareForNotification<M> = Box<dyn Fn(&M) -> M + Send + Sync>;

/// Write gateway error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectionError {
    /// The stored version no longer matches the version the writer read.
    #[error("concurrency conflict on {collection}/{key}: expected version {expected}, found {actual:?}")]
    Concurrency {
        collection: &'static str,
        key: String,
        expected: u64,
        actual: Option<u64>,
    },

    /// Two different events tried to create the same read model.
    #[error("read model {collection}/{key} created by two different events (rejected message {message_id})")]
    DuplicateIdentity {
        collection: &'static str,
        key: String,
        message_id: MessageId,
    },

    #[error("collection {collection} is not attached to a projection")]
    NotAttached { collection: &'static str },

    #[error("collection {collection} is already attached to projection {projection}")]
    AlreadyAttached {
        collection: &'static str,
        projection: String,
    },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl CollectionError {
    pub fn is_concurrency(&self) -> bool {
        matches!(self, CollectionError::Concurrency { .. })
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, CollectionError::DuplicateIdentity { .. })
    }
}

/// Result of an insert or save.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The document was written.
    Applied,
    /// The document was already built from this event; nothing changed.
    AlreadyApplied,
}

/// Result of a delete.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub documents_affected: u64,
}

#[derive(Debug)]
struct Attachment {
    projection: String,
    status: ProjectionStatus,
    notify_subscribers: bool,
}

/// Per-read-model-type write gateway.
pub struct CollectionWrapper<M: ReadModel, S> {
    store: S,
    notifier: Arc<dyn NotifyToSubscribers>,
    attachment: OnceLock<Attachment>,
    on_save: Option<OnSave<M>>,
    prepare_for_notification: Option<PrepareForNotification<M>>,
    topics: Option<fn(&M) -> Vec<String>>,
}

impl<M, S> CollectionWrapper<M, S>
where
    M: ReadModel,
    S: ReadModelStore<M>,
{
    pub fn new(store: S, notifier: impl NotifyToSubscribers + 'static) -> Self {
        Self {
            store,
            notifier: Arc::new(notifier),
            attachment: OnceLock::new(),
            on_save: None,
            prepare_for_notification: None,
            topics: None,
        }
    }

    pub fn with_on_save(mut self, hook: impl Fn(&mut M, &DomainEvent) + Send + Sync + 'static) -> Self {
        self.on_save = Some(Box::new(hook));
        self
    }

    pub fn with_prepare_for_notification(mut self, transform: impl Fn(&M) -> M + Send + Sync + 'static) -> Self {
        self.prepare_for_notification = Some(Box::new(transform));
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.get().is_some()
    }

    pub(crate) fn bind(
        &self,
        projection: &str,
        status: ProjectionStatus,
        notify_subscribers: bool,
    ) -> Result<(), CollectionError> {
        let attachment = Attachment {
            projection: projection.to_string(),
            status,
            notify_subscribers,
        };
        self.attachment.set(attachment).map_err(|_| CollectionError::AlreadyAttached {
            collection: M::COLLECTION,
            projection: self
                .attachment
                .get()
                .map(|a| a.projection.clone())
                .unwrap_or_default(),
        })
    }

    fn attachment(&self) -> Result<&Attachment, CollectionError> {
        self.attachment.get().ok_or(CollectionError::NotAttached {
            collection: M::COLLECTION,
        })
    }

    /// Resolve the attachment and take the mode snapshot used for one write.
    fn begin_write(&self) -> Result<(&Attachment, ProjectionMode), CollectionError> {
        let attachment = self.attachment()?;
        Ok((attachment, attachment.status.mode()))
    }

    fn should_notify(attachment: &Attachment, mode: ProjectionMode, notify: bool) -> bool {
        mode == ProjectionMode::Live && (notify || attachment.notify_subscribers)
    }

    fn stamp(event: &DomainEvent, model: &mut M, version: u64) {
        let meta = model.meta_mut();
        meta.version = version;
        meta.record(event.message_id());
        meta.last_modified = Some(event.commit_stamp());
    }

    fn key_of(id: &M::Key) -> String {
        match serde_json::to_value(id) {
            Ok(serde_json::Value::String(key)) => key,
            Ok(key) => key.to_string(),
            Err(_) => format!("{id:?}"),
        }
    }

    fn change_notification(
        &self,
        kind: UpdateKind,
        model: &M,
    ) -> Result<ReadModelUpdatedMessage, serde_json::Error> {
        let key = serde_json::to_value(model.id())?;
        let snapshot = match &self.prepare_for_notification {
            Some(prepare) => serde_json::to_value(prepare(model))?,
            None => serde_json::to_value(model)?,
        };
        Ok(match kind {
            UpdateKind::Created => ReadModelUpdatedMessage::created(M::COLLECTION, key, snapshot),
            _ => ReadModelUpdatedMessage::updated(M::COLLECTION, key, snapshot),
        })
    }

    fn emit(&self, message: Result<ReadModelUpdatedMessage, serde_json::Error>) {
        match message {
            Ok(message) => self.notifier.send(message),
            Err(err) => warn!(
                collection = M::COLLECTION,
                error = %err,
                "read model notification could not be serialized"
            ),
        }
    }

    // -- reads ---------------------------------------------------------------

    pub fn find_by_id(&self, id: &M::Key) -> Result<Option<M>, CollectionError> {
        Ok(self.store.find_by_id(id)?)
    }

    /// Matching documents, ordered by key.
    pub fn query(&self, filter: impl Fn(&M) -> bool) -> Result<Vec<M>, CollectionError> {
        Ok(self.store.query(&filter)?)
    }

    pub fn contains(&self, filter: impl Fn(&M) -> bool) -> Result<bool, CollectionError> {
        Ok(!self.store.query(&filter)?.is_empty())
    }

    /// Every document, ordered by key.
    pub fn all(&self) -> Result<Vec<M>, CollectionError> {
        Ok(self.store.all()?)
    }

    // -- writes --------------------------------------------------------------

    /// Create a new document built from `event`.
    ///
    /// On a duplicate key the stored document is re-read: if it already records
    /// `event` the call is an idempotent no-op (and `model` is replaced by the
    /// stored document); otherwise it fails with `DuplicateIdentity`. `model`
    /// only receives the stamped version once the write is durable.
    pub fn insert(&self, event: &DomainEvent, model: &mut M, notify: bool) -> Result<WriteOutcome, CollectionError> {
        let (attachment, mode) = self.begin_write()?;

        let mut candidate = model.clone();
        if let Some(on_save) = &self.on_save {
            on_save(&mut candidate, event);
        }
        Self::stamp(event, &mut candidate, 1);

        match self.store.insert(&candidate)? {
            InsertOutcome::Inserted => *model = candidate,
            InsertOutcome::DuplicateKey => {
                let saved = self.store.find_by_id(model.id())?;
                return match saved {
                    Some(saved) if saved.built_from_event(&event.message_id()) => {
                        debug!(
                            collection = M::COLLECTION,
                            key = %Self::key_of(model.id()),
                            message_id = %event.message_id(),
                            "read model already created by this event"
                        );
                        *model = saved;
                        Ok(WriteOutcome::AlreadyApplied)
                    }
                    _ => {
                        warn!(
                            collection = M::COLLECTION,
                            key = %Self::key_of(model.id()),
                            message_id = %event.message_id(),
                            "read model created by two different events"
                        );
                        Err(CollectionError::DuplicateIdentity {
                            collection: M::COLLECTION,
                            key: Self::key_of(model.id()),
                            message_id: event.message_id(),
                        })
                    }
                };
            }
        }

        debug!(
            collection = M::COLLECTION,
            key = %Self::key_of(model.id()),
            message_id = %event.message_id(),
            "read model inserted"
        );

        if Self::should_notify(attachment, mode, notify) {
            self.emit(self.change_notification(UpdateKind::Created, model));
        }
        Ok(WriteOutcome::Applied)
    }

    /// Persist changes made to a document read from this collection.
    ///
    /// The update is conditional on the version `model` was read with. A
    /// mismatch fails with `Concurrency` and leaves both storage and `model`
    /// untouched; the caller has to re-read.
    pub fn save(&self, event: &DomainEvent, model: &mut M, notify: bool) -> Result<WriteOutcome, CollectionError> {
        let (attachment, mode) = self.begin_write()?;

        if model.built_from_event(&event.message_id()) {
            return Ok(WriteOutcome::AlreadyApplied);
        }

        let original_version = model.version();
        let mut candidate = model.clone();
        if let Some(on_save) = &self.on_save {
            on_save(&mut candidate, event);
        }
        Self::stamp(event, &mut candidate, original_version + 1);

        match self.store.conditional_update(&candidate, original_version)? {
            UpdateOutcome::Updated => *model = candidate,
            UpdateOutcome::VersionMismatch { actual } => {
                warn!(
                    collection = M::COLLECTION,
                    key = %Self::key_of(model.id()),
                    expected = original_version,
                    actual = ?actual,
                    "read model version conflict"
                );
                return Err(CollectionError::Concurrency {
                    collection: M::COLLECTION,
                    key: Self::key_of(model.id()),
                    expected: original_version,
                    actual,
                });
            }
        }

        debug!(
            collection = M::COLLECTION,
            key = %Self::key_of(model.id()),
            version = model.version(),
            message_id = %event.message_id(),
            "read model saved"
        );

        if Self::should_notify(attachment, mode, notify) {
            self.emit(self.change_notification(UpdateKind::Updated, model));
        }
        Ok(WriteOutcome::Applied)
    }

    /// Update the document at `id`, or create it when absent.
    pub fn upsert(
        &self,
        event: &DomainEvent,
        id: M::Key,
        insert: impl FnOnce() -> M,
        update: impl FnOnce(&mut M),
        notify: bool,
    ) -> Result<M, CollectionError> {
        self.attachment()?;

        match self.store.find_by_id(&id)? {
            Some(mut model) => {
                if model.built_from_event(&event.message_id()) {
                    return Ok(model);
                }
                update(&mut model);
                self.save(event, &mut model, notify)?;
                Ok(model)
            }
            None => {
                let mut model = insert();
                model.set_id(id);
                self.insert(event, &mut model, notify)?;
                Ok(model)
            }
        }
    }

    /// Apply `action` to every matching document not yet built from `event`,
    /// in key order. Returns how many documents were saved.
    pub fn find_and_modify(
        &self,
        event: &DomainEvent,
        filter: impl Fn(&M) -> bool,
        mut action: impl FnMut(&mut M),
        notify: bool,
    ) -> Result<usize, CollectionError> {
        self.attachment()?;

        let mut models = self.store.query(&filter)?;
        models.sort_by(|a, b| a.id().cmp(b.id()));

        let mut saved = 0;
        for mut model in models {
            if model.built_from_event(&event.message_id()) {
                continue;
            }
            action(&mut model);
            if self.save(event, &mut model, notify)? == WriteOutcome::Applied {
                saved += 1;
            }
        }
        Ok(saved)
    }

    /// Single-document variant of [`Self::find_and_modify`]; `None` when the
    /// document does not exist.
    pub fn find_and_modify_by_id(
        &self,
        event: &DomainEvent,
        id: &M::Key,
        action: impl FnOnce(&mut M),
        notify: bool,
    ) -> Result<Option<WriteOutcome>, CollectionError> {
        self.attachment()?;

        let Some(mut model) = self.store.find_by_id(id)? else {
            return Ok(None);
        };
        if model.built_from_event(&event.message_id()) {
            return Ok(Some(WriteOutcome::AlreadyApplied));
        }
        action(&mut model);
        self.save(event, &mut model, notify).map(Some)
    }

    /// Remove a document. Deleting a missing id is a no-op.
    ///
    /// When the deletion will be announced and the model exposes topics, the
    /// topics are read before the removal. A notification is only published
    /// when exactly one document was removed.
    pub fn delete(&self, event: &DomainEvent, id: &M::Key, notify: bool) -> Result<DeleteOutcome, CollectionError> {
        let (attachment, mode) = self.begin_write()?;
        let announce = Self::should_notify(attachment, mode, notify);

        let mut topics = None;
        if let (true, Some(topics_of)) = (announce, self.topics) {
            match self.store.find_by_id(id)? {
                Some(model) => topics = Some(topics_of(&model)),
                None => return Ok(DeleteOutcome { documents_affected: 0 }),
            }
        }

        let documents_affected = self.store.delete(id)?;
        debug!(
            collection = M::COLLECTION,
            key = %Self::key_of(id),
            message_id = %event.message_id(),
            documents_affected,
            "read model delete"
        );

        if announce && documents_affected == 1 {
            match serde_json::to_value(id) {
                Ok(key) => self
                    .notifier
                    .send(ReadModelUpdatedMessage::deleted(M::COLLECTION, key, topics)),
                Err(err) => warn!(
                    collection = M::COLLECTION,
                    error = %err,
                    "read model key could not be serialized"
                ),
            }
        }
        Ok(DeleteOutcome { documents_affected })
    }

    // -- maintenance ---------------------------------------------------------

    pub fn insert_batch(&self, models: Vec<M>) -> Result<(), CollectionError> {
        Ok(self.store.insert_batch(models)?)
    }

    pub fn create_index(&self, spec: IndexSpec) -> Result<(), CollectionError> {
        Ok(self.store.create_index(spec)?)
    }

    pub fn index_exists(&self, spec: &IndexSpec) -> Result<bool, CollectionError> {
        Ok(self.store.index_exists(spec)?)
    }

    pub fn drop_collection(&self) -> Result<(), CollectionError> {
        Ok(self.store.drop_all()?)
    }
}

impl<M, S> CollectionWrapper<M, S>
where
    M: ReadModel + TopicsProvider,
    S: ReadModelStore<M>,
{
    /// Tag Deleted notifications with the model's topics.
    pub fn with_topics(mut self) -> Self {
        self.topics = Some(<M as TopicsProvider>::topics);
        self
    }
}

impl<M, S> ObserveProjection for CollectionWrapper<M, S>
where
    M: ReadModel,
    S: ReadModelStore<M>,
{
    fn collection_name(&self) -> &'static str {
        M::COLLECTION
    }

    fn rebuild_started(&self) -> Result<(), CollectionError> {
        self.attachment().map(|_| ())
    }

    fn drop_collection(&self) -> Result<(), CollectionError> {
        CollectionWrapper::<M, S>::drop_collection(self)
    }

    fn rebuild_ended(&self) -> Result<(), CollectionError> {
        Ok(self.store.flush()?)
    }
}

impl<M: ReadModel, S> core::fmt::Debug for CollectionWrapper<M, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CollectionWrapper")
            .field("collection", &M::COLLECTION)
            .field("attachment", &self.attachment.get())
            .field("on_save", &self.on_save.is_some())
            .field("prepare_for_notification", &self.prepare_for_notification.is_some())
            .field("topics", &self.topics.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::ProjectionContext;
    use crate::read_model::InMemoryReadModelStore;
    use crate::test_support::{
        created, deleted, redelivered_as_new, renamed, sample_collection, RecordingNotifier, SampleCollection,
        SampleReadModel, SampleStore,
    };

    fn attached(notifications: bool) -> (Arc<RecordingNotifier>, SampleStore, Arc<SampleCollection>, ProjectionContext) {
        projector_observability::init_for_tests();
        let notifier = RecordingNotifier::new();
        let (store, collection) = sample_collection(notifier.clone());
        let collection = Arc::new(collection);
        let context = ProjectionContext::new("samples-projection", "v1");
        context.attach(&collection, notifications).unwrap();
        (notifier, store, collection, context)
    }

    fn id(key: &str) -> String {
        key.to_string()
    }

    #[test]
    fn insert_stamps_version_and_message_id() {
        let (notifier, store, collection, _ctx) = attached(true);
        let e = created("a", "first");
        let mut model = SampleReadModel::named("a", "first");

        assert_eq!(collection.insert(&e, &mut model, false).unwrap(), WriteOutcome::Applied);

        let stored = store.find_by_id(&id("a")).unwrap().unwrap();
        assert_eq!(stored.version(), 1);
        assert_eq!(stored.meta.processed_events, vec![e.message_id()]);
        assert_eq!(stored.meta.last_modified, Some(e.commit_stamp()));

        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, UpdateKind::Created);
        assert_eq!(messages[0].model_type, "samples");
    }

    #[test]
    fn duplicate_insert_from_same_event_is_absorbed() {
        let (notifier, store, collection, _ctx) = attached(true);
        let e = created("a", "first");

        collection
            .insert(&e, &mut SampleReadModel::named("a", "first"), false)
            .unwrap();
        let mut racer = SampleReadModel::named("a", "first");
        let outcome = collection.insert(&e, &mut racer, false).unwrap();

        assert_eq!(outcome, WriteOutcome::AlreadyApplied);
        assert_eq!(racer.version(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.find_by_id(&id("a")).unwrap().unwrap().version(), 1);
        assert_eq!(notifier.len(), 1);
    }

    #[test]
    fn duplicate_insert_from_different_event_is_an_invariant_violation() {
        let (notifier, store, collection, _ctx) = attached(true);
        let first = created("a", "first");
        let second = redelivered_as_new(&created("a", "second"));

        collection
            .insert(&first, &mut SampleReadModel::named("a", "first"), false)
            .unwrap();
        let err = collection
            .insert(&second, &mut SampleReadModel::named("a", "second"), false)
            .unwrap_err();

        assert!(err.is_invariant_violation());
        assert_eq!(store.len(), 1);
        assert_eq!(store.find_by_id(&id("a")).unwrap().unwrap().name, "first");
        assert_eq!(notifier.len(), 1);
    }

    #[test]
    fn save_is_idempotent_per_message() {
        let (notifier, store, collection, _ctx) = attached(true);
        collection
            .insert(&created("a", "first"), &mut SampleReadModel::named("a", "first"), false)
            .unwrap();
        notifier.clear();

        let e = renamed("a", "second");
        let mut model = store.find_by_id(&id("a")).unwrap().unwrap();
        model.name = "second".to_string();
        assert_eq!(collection.save(&e, &mut model, false).unwrap(), WriteOutcome::Applied);
        assert_eq!(collection.save(&e, &mut model, false).unwrap(), WriteOutcome::AlreadyApplied);

        let stored = store.find_by_id(&id("a")).unwrap().unwrap();
        assert_eq!(stored.version(), 2);
        assert_eq!(stored.meta.processed_events.len(), 2);
        assert_eq!(notifier.len(), 1);
        assert_eq!(notifier.messages()[0].kind, UpdateKind::Updated);
    }

    #[test]
    fn stale_save_fails_with_concurrency_and_leaves_storage_untouched() {
        let (_notifier, store, collection, _ctx) = attached(false);
        collection
            .insert(&created("a", "first"), &mut SampleReadModel::named("a", "first"), false)
            .unwrap();

        let mut fresh = store.find_by_id(&id("a")).unwrap().unwrap();
        let mut stale = fresh.clone();

        fresh.name = "fresh".to_string();
        collection.save(&renamed("a", "fresh"), &mut fresh, false).unwrap();

        stale.name = "stale".to_string();
        let err = collection.save(&renamed("a", "stale"), &mut stale, false).unwrap_err();

        assert!(err.is_concurrency());
        assert!(matches!(err, CollectionError::Concurrency { expected: 1, actual: Some(2), .. }));
        let stored = store.find_by_id(&id("a")).unwrap().unwrap();
        assert_eq!(stored.name, "fresh");
        assert_eq!(stored.version(), 2);
    }

    #[test]
    fn retrying_a_stale_save_keeps_failing() {
        let (_notifier, store, collection, _ctx) = attached(false);
        collection
            .insert(&created("a", "first"), &mut SampleReadModel::named("a", "first"), false)
            .unwrap();

        let mut fresh = store.find_by_id(&id("a")).unwrap().unwrap();
        let mut stale = fresh.clone();
        fresh.name = "fresh".to_string();
        collection.save(&renamed("a", "fresh"), &mut fresh, false).unwrap();

        let e = renamed("a", "stale");
        stale.name = "stale".to_string();
        let first = collection.save(&e, &mut stale, false).unwrap_err();
        assert_eq!(stale.version(), 1);
        assert!(!stale.built_from_event(&e.message_id()));

        let retry = collection.save(&e, &mut stale, false).unwrap_err();

        assert_eq!(first, retry);
        assert_eq!(
            retry,
            CollectionError::Concurrency {
                collection: "samples",
                key: "a".to_string(),
                expected: 1,
                actual: Some(2),
            }
        );
        let stored = store.find_by_id(&id("a")).unwrap().unwrap();
        assert_eq!(stored.name, "fresh");
        assert!(!stored.built_from_event(&e.message_id()));
    }

    #[test]
    fn rejected_insert_leaves_the_callers_model_unstamped() {
        let (_notifier, _store, collection, _ctx) = attached(false);
        collection
            .insert(&created("a", "first"), &mut SampleReadModel::named("a", "first"), false)
            .unwrap();

        let second = created("a", "second");
        let mut model = SampleReadModel::named("a", "second");
        let err = collection.insert(&second, &mut model, false).unwrap_err();

        assert!(matches!(err, CollectionError::DuplicateIdentity { ref key, .. } if key == "a"));
        assert_eq!(model.version(), 0);
        assert!(model.meta.processed_events.is_empty());
    }

    #[test]
    fn upsert_inserts_then_updates() {
        let (_notifier, store, collection, _ctx) = attached(false);
        let create = created("a", "first");
        let rename = renamed("a", "second");

        let model = collection
            .upsert(&create, id("a"), || SampleReadModel::named("", "first"), |_| {}, false)
            .unwrap();
        assert_eq!(model.id, "a");
        assert_eq!(model.version(), 1);

        let model = collection
            .upsert(
                &rename,
                id("a"),
                || SampleReadModel::named("", "unused"),
                |m| m.name = "second".to_string(),
                false,
            )
            .unwrap();
        assert_eq!(model.version(), 2);

        let again = collection
            .upsert(&rename, id("a"), || SampleReadModel::named("", "unused"), |m| m.renames += 1, false)
            .unwrap();
        assert_eq!(again.renames, 0);
        assert_eq!(store.find_by_id(&id("a")).unwrap().unwrap().version(), 2);
    }

    #[test]
    fn find_and_modify_skips_documents_already_built_from_event() {
        let (_notifier, store, collection, _ctx) = attached(false);
        for key in ["c", "a", "b"] {
            collection
                .insert(&created(key, key), &mut SampleReadModel::named(key, key), false)
                .unwrap();
        }

        let e = renamed("*", "bulk");
        let mut visited = Vec::new();
        let saved = collection
            .find_and_modify(&e, |m| m.id != "b", |m| visited.push(m.id.clone()), false)
            .unwrap();
        assert_eq!(saved, 2);
        assert_eq!(visited, vec!["a", "c"]);

        let again = collection.find_and_modify(&e, |_| true, |m| m.renames += 1, false).unwrap();
        assert_eq!(again, 1);
        assert_eq!(store.find_by_id(&id("a")).unwrap().unwrap().renames, 0);
        assert_eq!(store.find_by_id(&id("b")).unwrap().unwrap().renames, 1);
    }

    #[test]
    fn find_and_modify_by_id_reports_missing_documents() {
        let (_notifier, _store, collection, _ctx) = attached(false);
        let outcome = collection
            .find_and_modify_by_id(&renamed("nope", "x"), &id("nope"), |_| {}, false)
            .unwrap();
        assert_eq!(outcome, None);
    }

    #[test]
    fn delete_of_missing_id_is_a_silent_no_op() {
        let (notifier, _store, collection, _ctx) = attached(true);

        let outcome = collection.delete(&deleted("ghost"), &id("ghost"), true).unwrap();

        assert_eq!(outcome.documents_affected, 0);
        assert_eq!(notifier.len(), 0);
    }

    #[test]
    fn delete_notification_carries_topics_read_before_removal() {
        let (notifier, store, collection, _ctx) = attached(false);
        let mut model = SampleReadModel::named("a", "first").with_topics(&["team:1", "all"]);
        collection.insert(&created("a", "first"), &mut model, false).unwrap();

        let outcome = collection.delete(&deleted("a"), &id("a"), true).unwrap();

        assert_eq!(outcome.documents_affected, 1);
        assert!(store.is_empty());
        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, UpdateKind::Deleted);
        assert!(messages[0].has_topic("team:1"));
        assert!(messages[0].model.is_none());
    }

    #[test]
    fn created_and_updated_notifications_carry_no_topics() {
        let (notifier, store, collection, _ctx) = attached(true);
        let mut model = SampleReadModel::named("a", "first").with_topics(&["team:1"]);
        collection.insert(&created("a", "first"), &mut model, false).unwrap();

        let mut model = store.find_by_id(&id("a")).unwrap().unwrap();
        model.name = "second".to_string();
        collection.save(&renamed("a", "second"), &mut model, false).unwrap();

        let messages = notifier.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.topics.is_none()));
        assert_eq!(messages[1].model.as_ref().unwrap()["name"], "second");
    }

    #[test]
    fn writes_before_attach_fail_fast() {
        let (_store, collection) = sample_collection(RecordingNotifier::new());
        let err = collection
            .insert(&created("a", "a"), &mut SampleReadModel::named("a", "a"), false)
            .unwrap_err();
        assert_eq!(err, CollectionError::NotAttached { collection: "samples" });
        assert!(collection.rebuild_started().is_err());
    }

    #[test]
    fn second_attach_is_rejected() {
        let (_notifier, _store, collection, _ctx) = attached(false);
        let other = ProjectionContext::new("other", "v1");

        let err = other.attach(&collection, false).unwrap_err();

        assert!(matches!(err, CollectionError::AlreadyAttached { ref projection, .. } if projection == "samples-projection"));
    }

    #[test]
    fn rebuilding_projection_suppresses_notifications() {
        let (notifier, store, collection, ctx) = attached(true);
        ctx.status().transition(ProjectionMode::Rebuilding);

        collection
            .insert(&created("a", "a"), &mut SampleReadModel::named("a", "a"), true)
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(notifier.len(), 0);
    }

    #[test]
    fn hooks_run_at_composition_defined_points() {
        let notifier = RecordingNotifier::new();
        let store: SampleStore = Arc::new(InMemoryReadModelStore::new());
        let collection = Arc::new(
            CollectionWrapper::<SampleReadModel, _>::new(store.clone(), notifier.clone())
                .with_on_save(|m: &mut SampleReadModel, _| m.name = m.name.to_uppercase())
                .with_prepare_for_notification(|m: &SampleReadModel| {
                    let mut redacted = m.clone();
                    redacted.name = "<redacted>".to_string();
                    redacted
                }),
        );
        ProjectionContext::new("hooks", "v1").attach(&collection, true).unwrap();

        collection
            .insert(&created("a", "quiet"), &mut SampleReadModel::named("a", "quiet"), false)
            .unwrap();

        assert_eq!(store.find_by_id(&id("a")).unwrap().unwrap().name, "QUIET");
        let snapshot = notifier.messages()[0].model.clone().unwrap();
        assert_eq!(snapshot["name"], "<redacted>");
        assert!(notifier.messages()[0].topics.is_none());
    }

    #[test]
    fn rebuild_hooks_drop_and_flush_the_store() {
        let (_notifier, store, collection, _ctx) = attached(false);
        collection
            .insert(&created("a", "a"), &mut SampleReadModel::named("a", "a"), false)
            .unwrap();

        collection.rebuild_started().unwrap();
        ObserveProjection::drop_collection(collection.as_ref()).unwrap();
        collection.rebuild_ended().unwrap();

        assert!(store.is_empty());
        assert_eq!(store.flush_count(), 1);
        assert_eq!(collection.collection_name(), "samples");
    }
}
