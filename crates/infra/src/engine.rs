//! Checkpoint-driven dispatch of committed events to projections.
//!
//! One cycle, per registered projection:
//! 1. read the projection's checkpoint
//! 2. fetch commits strictly after it, in stream order, up to the stream head
//!    captured when the cycle started
//! 3. apply every event of a commit (events the projection does not subscribe
//!    to are skipped)
//! 4. advance the checkpoint to the commit's position once the whole commit
//!    applied without error
//!
//! Projections are independent: each one has its own dispatch lock and its own
//! checkpoint, and a failing projection stops only itself. A failed commit is
//! not rolled back; the next cycle redelivers it and the write path's
//! idempotency check absorbs what already landed.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use projector_core::MessageId;
use projector_events::{Commit, Position};

use crate::checkpoint::{CheckpointError, CheckpointTracker};
use crate::config::EngineConfig;
use crate::event_store::{EventStore, EventStoreError};
use crate::projection::{ApplyOutcome, Projection, ProjectionError};
use crate::rebuild::{self, RebuildControl, RebuildError};

/// A commit that a projection could not apply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{event_type} ({message_id}) at position {position}: {source}")]
pub struct ApplyFailure {
    pub position: Position,
    pub message_id: MessageId,
    pub event_type: String,
    #[source]
    pub source: ProjectionError,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("projection {projection} failed on {source}")]
    Projection {
        projection: String,
        #[source]
        source: ApplyFailure,
    },

    #[error("projection {projection} has checkpoint signature {stored}, expected {current}")]
    SignatureMismatch {
        projection: String,
        stored: String,
        current: String,
    },

    #[error("projection {0} is rebuilding")]
    Rebuilding(String),

    #[error("projection {0} is already registered")]
    DuplicateProjection(String),

    #[error("projection {0} panicked during dispatch")]
    Panicked(String),

    #[error(transparent)]
    Rebuild(#[from] RebuildError),

    #[error("dispatch cycle failed for {}", failed.join(", "))]
    CycleFailed {
        failed: Vec<String>,
        report: Box<CycleReport>,
    },
}

/// What one cycle did for one projection.
#[derive(Debug)]
pub struct ProjectionCycle {
    pub projection: String,
    pub from: Position,
    pub to: Position,
    pub commits: usize,
    pub events_handled: usize,
    pub error: Option<DispatchError>,
}

impl ProjectionCycle {
    fn new(projection: &str, from: Position) -> Self {
        Self {
            projection: projection.to_string(),
            from,
            to: from,
            commits: 0,
            events_handled: 0,
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of one dispatch cycle, in registration order.
#[derive(Debug)]
pub struct CycleReport {
    /// Stream head captured when the cycle started.
    pub head: Position,
    pub projections: Vec<ProjectionCycle>,
}

impl CycleReport {
    pub fn is_ok(&self) -> bool {
        self.projections.iter().all(ProjectionCycle::is_ok)
    }

    pub fn failed(&self) -> Vec<String> {
        self.projections
            .iter()
            .filter(|p| !p.is_ok())
            .map(|p| p.projection.clone())
            .collect()
    }

    pub fn get(&self, projection: &str) -> Option<&ProjectionCycle> {
        self.projections.iter().find(|p| p.projection == projection)
    }
}

pub(crate) struct Registration {
    pub(crate) projection: Arc<dyn Projection>,
    dispatch: Mutex<()>,
}

impl Registration {
    /// Serializes dispatch and rebuild of one projection.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        match self.dispatch.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Applies every event of `commit` to `projection`; returns how many were handled.
pub(crate) fn apply_commit(projection: &dyn Projection, commit: &Commit) -> Result<usize, ApplyFailure> {
    let mut handled = 0;
    for event in &commit.events {
        match projection.apply(event) {
            Ok(ApplyOutcome::Handled) => handled += 1,
            Ok(ApplyOutcome::Ignored) => {}
            Err(source) => {
                return Err(ApplyFailure {
                    position: commit.position,
                    message_id: event.message_id(),
                    event_type: event.event_type().to_string(),
                    source,
                });
            }
        }
    }
    Ok(handled)
}

/// Drives registered projections forward from their checkpoints.
pub struct ProjectionEngine<E> {
    events: E,
    checkpoints: Arc<CheckpointTracker>,
    config: EngineConfig,
    registrations: RwLock<Vec<Arc<Registration>>>,
}

impl<E> ProjectionEngine<E>
where
    E: EventStore,
{
    pub fn new(events: E, checkpoints: Arc<CheckpointTracker>, config: EngineConfig) -> Self {
        Self {
            events,
            checkpoints,
            config,
            registrations: RwLock::new(Vec::new()),
        }
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointTracker> {
        &self.checkpoints
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Add a projection; its stored checkpoint (if any) is loaded.
    pub fn register(&self, projection: Arc<dyn Projection>) -> Result<(), DispatchError> {
        let name = projection.name().to_string();
        let mut registrations = match self.registrations.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if registrations.iter().any(|r| r.projection.name() == name) {
            return Err(DispatchError::DuplicateProjection(name));
        }

        let stored = self.checkpoints.track(&name)?;
        info!(
            projection = %name,
            signature = projection.signature(),
            checkpoint = %stored.as_ref().map(|c| c.current).unwrap_or(Position::START),
            "projection registered"
        );

        registrations.push(Arc::new(Registration {
            projection,
            dispatch: Mutex::new(()),
        }));
        Ok(())
    }

    pub fn projection_names(&self) -> Vec<String> {
        self.registrations()
            .iter()
            .map(|r| r.projection.name().to_string())
            .collect()
    }

    pub(crate) fn registrations(&self) -> Vec<Arc<Registration>> {
        match self.registrations.read() {
            Ok(registrations) => registrations.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn registration(&self, name: &str) -> Option<Arc<Registration>> {
        self.registrations()
            .into_iter()
            .find(|r| r.projection.name() == name)
    }

    /// Reconcile stored checkpoints with the registered projections.
    ///
    /// A projection whose checkpoint was written by another signature is
    /// rebuilt when `rebuild_on_signature_change` is set; otherwise it stays
    /// refused by dispatch with `SignatureMismatch`. Returns the names of the
    /// projections that were rebuilt.
    pub fn initialize(&self) -> Result<Vec<String>, DispatchError> {
        let mut rebuilt = Vec::new();
        for registration in self.registrations() {
            let projection = &registration.projection;
            let Some(checkpoint) = self.checkpoints.checkpoint(projection.name()) else {
                continue;
            };
            if checkpoint.signature == projection.signature() {
                continue;
            }

            if !self.config.rebuild_on_signature_change {
                warn!(
                    projection = projection.name(),
                    stored = %checkpoint.signature,
                    current = projection.signature(),
                    "projection signature changed; dispatch refused until rebuilt"
                );
                continue;
            }

            info!(
                projection = projection.name(),
                stored = %checkpoint.signature,
                current = projection.signature(),
                "projection signature changed; rebuilding"
            );
            rebuild::run(self, &registration, &RebuildControl::new())?;
            rebuilt.push(projection.name().to_string());
        }
        Ok(rebuilt)
    }

    /// Run exactly one cycle across all projections and wait for it.
    ///
    /// Returns once every projection has either caught up to the stream head
    /// captured at the start of the cycle or failed. Any failure fails the
    /// whole call with [`DispatchError::CycleFailed`]; projections that did
    /// not fail still advanced.
    pub fn update_and_wait(&self) -> Result<CycleReport, DispatchError> {
        let report = self.run_cycle()?;
        if report.is_ok() {
            Ok(report)
        } else {
            Err(DispatchError::CycleFailed {
                failed: report.failed(),
                report: Box::new(report),
            })
        }
    }

    /// One cycle; per-projection failures are reported, not returned.
    pub fn run_cycle(&self) -> Result<CycleReport, DispatchError> {
        let head = self.events.head()?;
        let registrations = self.registrations();

        let projections: Vec<ProjectionCycle> = if self.config.parallel_dispatch && registrations.len() > 1 {
            std::thread::scope(|scope| {
                let workers: Vec<_> = registrations
                    .iter()
                    .map(|registration| scope.spawn(move || self.dispatch_projection(registration, head)))
                    .collect();
                workers
                    .into_iter()
                    .zip(registrations.iter())
                    .map(|(worker, registration)| {
                        worker.join().unwrap_or_else(|_| {
                            let name = registration.projection.name();
                            let mut cycle = ProjectionCycle::new(name, self.checkpoints.current_position(name));
                            cycle.error = Some(DispatchError::Panicked(name.to_string()));
                            cycle
                        })
                    })
                    .collect()
            })
        } else {
            registrations
                .iter()
                .map(|registration| self.dispatch_projection(registration, head))
                .collect()
        };

        let report = CycleReport { head, projections };
        let commits: usize = report.projections.iter().map(|p| p.commits).sum();
        let events: usize = report.projections.iter().map(|p| p.events_handled).sum();
        if report.is_ok() {
            info!(head = %head, commits, events, "dispatch cycle complete");
        } else {
            error!(head = %head, failed = ?report.failed(), "dispatch cycle failed");
        }
        Ok(report)
    }

    fn dispatch_projection(&self, registration: &Registration, head: Position) -> ProjectionCycle {
        let _guard = registration.lock();
        let projection = registration.projection.as_ref();
        let name = projection.name();

        let mut cycle = ProjectionCycle::new(name, self.checkpoints.current_position(name));
        if let Err(err) = self.drain(projection, head, &mut cycle) {
            error!(projection = name, position = %cycle.to, error = %err, "projection dispatch failed");
            cycle.error = Some(err);
        }
        cycle
    }

    fn drain(&self, projection: &dyn Projection, head: Position, cycle: &mut ProjectionCycle) -> Result<(), DispatchError> {
        let name = projection.name();

        if projection.is_rebuilding() {
            return Err(DispatchError::Rebuilding(name.to_string()));
        }
        if let Some(checkpoint) = self.checkpoints.checkpoint(name) {
            if checkpoint.signature != projection.signature() {
                return Err(DispatchError::SignatureMismatch {
                    projection: name.to_string(),
                    stored: checkpoint.signature,
                    current: projection.signature().to_string(),
                });
            }
        }

        while cycle.to < head {
            let commits = self.events.commits_after(cycle.to, self.config.batch_size)?;
            let batch_start = cycle.to;

            for commit in commits.iter().take_while(|c| c.position <= head) {
                let handled = apply_commit(projection, commit).map_err(|source| DispatchError::Projection {
                    projection: name.to_string(),
                    source,
                })?;
                self.checkpoints
                    .record_position(name, projection.signature(), commit.position)?;

                debug!(projection = name, position = %commit.position, events = handled, "commit applied");
                cycle.to = commit.position;
                cycle.commits += 1;
                cycle.events_handled += handled;
            }

            if cycle.to == batch_start {
                break;
            }
        }
        Ok(())
    }

    /// Whether every registered projection has applied `position`.
    pub fn is_projected_by_all(&self, position: Position) -> bool {
        self.checkpoints.is_projected_by_all(position)
    }

    /// Per-projection checkpoint positions.
    pub fn positions(&self) -> BTreeMap<String, Position> {
        self.checkpoints.all_positions()
    }
}

impl<E> core::fmt::Debug for ProjectionEngine<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProjectionEngine")
            .field("config", &self.config)
            .field("checkpoints", &self.checkpoints)
            .finish()
    }
}
