//! Full reconstruction of a projection from the start of the stream.
//!
//! Protocol, holding the projection's dispatch lock throughout:
//! 1. mark the projection Rebuilding (notifications stop)
//! 2. drop every owned collection
//! 3. replay the stream from `Position::START` up to the head captured at
//!    the start, through the same apply path live dispatch uses
//! 4. flush every owned collection
//! 5. publish the checkpoint at the last replayed position
//! 6. mark the projection Live
//!
//! Any failure (including cancellation) leaves the projection Rebuilding so
//! live dispatch refuses it until a later rebuild succeeds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use projector_events::Position;

use crate::checkpoint::CheckpointError;
use crate::collection::CollectionError;
use crate::engine::{apply_commit, ApplyFailure, ProjectionEngine, Registration};
use crate::event_store::{EventStore, EventStoreError};
use crate::projection::ProjectionMode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RebuildError {
    #[error("unknown projection {0}")]
    UnknownProjection(String),

    #[error("rebuild of {projection} cancelled")]
    Cancelled { projection: String },

    #[error("rebuild of {projection} could not prepare {collection}: {source}")]
    Collection {
        projection: String,
        collection: &'static str,
        #[source]
        source: CollectionError,
    },

    #[error("rebuild of {projection} failed on {source}")]
    Replay {
        projection: String,
        #[source]
        source: ApplyFailure,
    },

    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("rebuild thread failed: {0}")]
    Thread(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildPhase {
    Pending,
    Dropping,
    Replaying,
    Flushing,
    Complete,
    /// Failed or cancelled.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildProgress {
    pub projection: String,
    pub phase: RebuildPhase,
    /// Stream head the replay runs up to.
    pub target: Position,
    /// Last replayed commit.
    pub position: Position,
    pub commits_replayed: u64,
    pub events_replayed: u64,
    pub error: Option<String>,
}

impl RebuildProgress {
    fn new(projection: &str) -> Self {
        Self {
            projection: projection.to_string(),
            phase: RebuildPhase::Pending,
            target: Position::START,
            position: Position::START,
            commits_replayed: 0,
            events_replayed: 0,
            error: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, RebuildPhase::Complete | RebuildPhase::Failed)
    }
}

/// Shared progress and cancellation flag of one rebuild.
#[derive(Debug, Clone, Default)]
pub(crate) struct RebuildControl {
    progress: Arc<RwLock<Option<RebuildProgress>>>,
    cancellation: Arc<AtomicBool>,
}

impl RebuildControl {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut RebuildProgress)) {
        let mut guard = match self.progress.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(progress) = guard.as_mut() {
            f(progress);
        }
    }

    fn start(&self, projection: &str) {
        let mut guard = match self.progress.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get_or_insert_with(|| RebuildProgress::new(projection));
    }

    fn phase(&self, phase: RebuildPhase) {
        self.update(|p| p.phase = phase);
    }

    fn snapshot(&self) -> Option<RebuildProgress> {
        match self.progress.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.load(Ordering::Relaxed)
    }
}

/// Handle for monitoring and controlling a background rebuild.
#[derive(Debug)]
pub struct RebuildHandle {
    projection: String,
    control: RebuildControl,
    join: Option<thread::JoinHandle<Result<RebuildProgress, RebuildError>>>,
}

impl RebuildHandle {
    pub fn projection(&self) -> &str {
        &self.projection
    }

    pub fn progress(&self) -> RebuildProgress {
        self.control
            .snapshot()
            .unwrap_or_else(|| RebuildProgress::new(&self.projection))
    }

    /// Stop at the next commit boundary. The projection stays Rebuilding.
    pub fn cancel(&self) {
        self.control.cancellation.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// Wait for the rebuild thread to finish.
    pub fn wait(mut self) -> Result<RebuildProgress, RebuildError> {
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| RebuildError::Thread(format!("rebuild of {} panicked", self.projection)))?,
            None => Ok(self.progress()),
        }
    }
}

/// Starts and runs projection rebuilds against an engine.
pub struct RebuildCoordinator<E> {
    engine: Arc<ProjectionEngine<E>>,
}

impl<E> RebuildCoordinator<E>
where
    E: EventStore + 'static,
{
    pub fn new(engine: Arc<ProjectionEngine<E>>) -> Self {
        Self { engine }
    }

    /// Rebuild on the calling thread.
    pub fn rebuild(&self, projection: &str) -> Result<RebuildProgress, RebuildError> {
        let registration = self
            .engine
            .registration(projection)
            .ok_or_else(|| RebuildError::UnknownProjection(projection.to_string()))?;
        run(self.engine.as_ref(), &registration, &RebuildControl::new())
    }

    /// Rebuild on a background thread.
    pub fn start(&self, projection: &str) -> Result<RebuildHandle, RebuildError> {
        let registration = self
            .engine
            .registration(projection)
            .ok_or_else(|| RebuildError::UnknownProjection(projection.to_string()))?;

        let control = RebuildControl::new();
        control.start(projection);

        let engine = self.engine.clone();
        let thread_control = control.clone();
        let join = thread::Builder::new()
            .name(format!("rebuild-{projection}"))
            .spawn(move || run(engine.as_ref(), &registration, &thread_control))
            .map_err(|e| RebuildError::Thread(e.to_string()))?;

        Ok(RebuildHandle {
            projection: projection.to_string(),
            control,
            join: Some(join),
        })
    }
}

impl<E> core::fmt::Debug for RebuildCoordinator<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RebuildCoordinator").finish_non_exhaustive()
    }
}

pub(crate) fn run<E: EventStore>(
    engine: &ProjectionEngine<E>,
    registration: &Registration,
    control: &RebuildControl,
) -> Result<RebuildProgress, RebuildError> {
    let _guard = registration.lock();
    let projection = registration.projection.as_ref();
    let name = projection.name();

    control.start(name);
    projection.context().status().transition(ProjectionMode::Rebuilding);
    info!(projection = name, "projection rebuild started");

    match replay(engine, registration, control) {
        Ok(()) => {
            projection.context().status().transition(ProjectionMode::Live);
            control.phase(RebuildPhase::Complete);
            let progress = control.snapshot().unwrap_or_else(|| RebuildProgress::new(name));
            info!(
                projection = name,
                position = %progress.position,
                commits = progress.commits_replayed,
                events = progress.events_replayed,
                "projection rebuild complete"
            );
            Ok(progress)
        }
        Err(err) => {
            control.update(|p| {
                p.phase = RebuildPhase::Failed;
                p.error = Some(err.to_string());
            });
            error!(projection = name, error = %err, "projection rebuild failed; projection stays rebuilding");
            Err(err)
        }
    }
}

fn replay<E: EventStore>(
    engine: &ProjectionEngine<E>,
    registration: &Registration,
    control: &RebuildControl,
) -> Result<(), RebuildError> {
    let projection = registration.projection.as_ref();
    let name = projection.name();
    let observers = projection.context().observers();
    let cancelled = || RebuildError::Cancelled {
        projection: name.to_string(),
    };
    let collection_error = |collection: &'static str| {
        move |source: CollectionError| RebuildError::Collection {
            projection: name.to_string(),
            collection,
            source,
        }
    };

    if control.is_cancelled() {
        return Err(cancelled());
    }

    control.phase(RebuildPhase::Dropping);
    info!(projection = name, collections = observers.len(), phase = "dropping", "projection rebuild phase");
    for observer in &observers {
        observer
            .rebuild_started()
            .map_err(collection_error(observer.collection_name()))?;
        observer
            .drop_collection()
            .map_err(collection_error(observer.collection_name()))?;
    }

    let target = engine.events().head()?;
    control.update(|p| {
        p.phase = RebuildPhase::Replaying;
        p.target = target;
    });
    info!(projection = name, target = %target, phase = "replaying", "projection rebuild phase");

    let mut position = Position::START;
    while position < target {
        let commits = engine
            .events()
            .commits_after(position, engine.config().batch_size)?;
        let batch_start = position;

        for commit in commits.iter().take_while(|c| c.position <= target) {
            if control.is_cancelled() {
                return Err(cancelled());
            }
            let handled = apply_commit(projection, commit).map_err(|source| RebuildError::Replay {
                projection: name.to_string(),
                source,
            })?;
            position = commit.position;
            control.update(|p| {
                p.position = commit.position;
                p.commits_replayed += 1;
                p.events_replayed += handled as u64;
            });
        }

        if position == batch_start {
            break;
        }
    }

    control.phase(RebuildPhase::Flushing);
    info!(projection = name, phase = "flushing", "projection rebuild phase");
    for observer in &observers {
        observer
            .rebuild_ended()
            .map_err(collection_error(observer.collection_name()))?;
    }

    engine
        .checkpoints()
        .record_position(name, projection.signature(), position)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointTracker, InMemoryCheckpointStore};
    use crate::config::EngineConfig;
    use crate::event_store::InMemoryEventStore;
    use crate::projection::Projection;
    use crate::read_model::ReadModelStore;
    use crate::test_support::{created, RecordingNotifier, SampleProjection};

    fn engine_with_sample() -> (Arc<ProjectionEngine<InMemoryEventStore>>, Arc<SampleProjection>) {
        let tracker = Arc::new(CheckpointTracker::new(Arc::new(InMemoryCheckpointStore::new())));
        let engine = Arc::new(ProjectionEngine::new(
            InMemoryEventStore::new(),
            tracker,
            EngineConfig::default(),
        ));
        let projection = SampleProjection::new(RecordingNotifier::new());
        engine.register(projection.clone()).unwrap();
        (engine, projection)
    }

    #[test]
    fn cancelled_rebuild_stops_before_replay_and_stays_rebuilding() {
        let (engine, projection) = engine_with_sample();
        engine.events().append(vec![created("a", "a")]).unwrap();
        engine.update_and_wait().unwrap();

        let control = RebuildControl::new();
        control.cancellation.store(true, Ordering::Relaxed);
        let registration = engine.registration(SampleProjection::NAME).unwrap();

        let err = run(engine.as_ref(), &registration, &control).unwrap_err();

        assert_eq!(
            err,
            RebuildError::Cancelled {
                projection: SampleProjection::NAME.to_string()
            }
        );
        assert!(projection.is_rebuilding());
        assert_eq!(projection.store.len(), 1);
        let progress = control.snapshot().unwrap();
        assert_eq!(progress.phase, RebuildPhase::Failed);
        assert!(progress.error.is_some());
    }

    #[test]
    fn successful_rebuild_after_failure_returns_projection_to_live() {
        let (engine, projection) = engine_with_sample();
        engine.events().append(vec![created("a", "a")]).unwrap();

        let control = RebuildControl::new();
        control.cancellation.store(true, Ordering::Relaxed);
        let registration = engine.registration(SampleProjection::NAME).unwrap();
        assert!(run(engine.as_ref(), &registration, &control).is_err());
        assert!(projection.is_rebuilding());

        let progress = RebuildCoordinator::new(engine.clone())
            .rebuild(SampleProjection::NAME)
            .unwrap();

        assert_eq!(progress.phase, RebuildPhase::Complete);
        assert!(!projection.is_rebuilding());
        assert_eq!(projection.store.all().unwrap().len(), 1);
    }

    #[test]
    fn handle_reports_pending_progress_before_start() {
        let progress = RebuildProgress::new("samples");
        assert_eq!(progress.phase, RebuildPhase::Pending);
        assert!(!progress.is_finished());
    }
}
