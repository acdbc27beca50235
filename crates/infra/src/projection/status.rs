use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Whether a projection's read models are serving live traffic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ProjectionMode {
    /// Notifications active; storage reflects the checkpoint.
    Live,
    /// Storage is being reconstructed; notifications suppressed and readers
    /// should treat the data as incomplete.
    Rebuilding,
}

impl ProjectionMode {
    const LIVE: u8 = 0;
    const REBUILDING: u8 = 1;

    fn to_raw(self) -> u8 {
        match self {
            ProjectionMode::Live => Self::LIVE,
            ProjectionMode::Rebuilding => Self::REBUILDING,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            Self::LIVE => ProjectionMode::Live,
            _ => ProjectionMode::Rebuilding,
        }
    }
}

/// Shared, atomically-switched mode of one projection.
///
/// Cloned into every collection wrapper attached to the projection. Writers take
/// one snapshot of the mode per write, and the switch itself is a single atomic
/// swap, so a write never observes a half-applied transition.
#[derive(Debug, Clone)]
pub struct ProjectionStatus {
    mode: Arc<AtomicU8>,
}

impl ProjectionStatus {
    pub fn new() -> Self {
        Self {
            mode: Arc::new(AtomicU8::new(ProjectionMode::Live.to_raw())),
        }
    }

    pub fn mode(&self) -> ProjectionMode {
        ProjectionMode::from_raw(self.mode.load(Ordering::Acquire))
    }

    pub fn is_rebuilding(&self) -> bool {
        self.mode() == ProjectionMode::Rebuilding
    }

    /// Switch mode, returning the previous one. Only the rebuild coordinator
    /// drives transitions.
    pub(crate) fn transition(&self, to: ProjectionMode) -> ProjectionMode {
        ProjectionMode::from_raw(self.mode.swap(to.to_raw(), Ordering::AcqRel))
    }
}

impl Default for ProjectionStatus {
    fn default() -> Self {
        Self::new()
    }
}
