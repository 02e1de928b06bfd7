//! Local object lifecycle hooks
//!
//! The coordinator never owns the object being created. It reports the
//! outcome through [`ObjectLifecycle`]: `creation_completed` once committed,
//! `destroy` to tear down a partially-created object after an abort.

use parking_lot::Mutex;

use super::peer::ObjectId;

/// Callback trait for the local object's lifecycle
///
/// CRITICAL: implementations MUST NOT call back into the coordinator.
pub trait ObjectLifecycle: Send + Sync {
    /// Creation committed; the object is live
    fn creation_completed(&self, object_id: &ObjectId);

    /// Creation aborted; remove the partially-created object
    fn destroy(&self, object_id: &ObjectId);
}

/// No-op lifecycle for hosts that track nothing
pub struct NoOpLifecycle;

impl ObjectLifecycle for NoOpLifecycle {
    fn creation_completed(&self, _object_id: &ObjectId) {}

    fn destroy(&self, _object_id: &ObjectId) {}
}

/// Outcome reported to a [`RecordingLifecycle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Completed(ObjectId),
    Destroyed(ObjectId),
}

/// Lifecycle that records every callback, for tests and simulations
#[derive(Debug, Default)]
pub struct RecordingLifecycle {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingLifecycle {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// All callbacks received so far, in order
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    /// Number of `creation_completed` callbacks
    pub fn completed_count(&self) -> usize {
        self.count(|e| matches!(e, LifecycleEvent::Completed(_)))
    }

    /// Number of `destroy` callbacks
    pub fn destroyed_count(&self) -> usize {
        self.count(|e| matches!(e, LifecycleEvent::Destroyed(_)))
    }

    fn count(&self, pred: impl Fn(&LifecycleEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

impl ObjectLifecycle for RecordingLifecycle {
    fn creation_completed(&self, object_id: &ObjectId) {
        self.events
            .lock()
            .push(LifecycleEvent::Completed(object_id.clone()));
    }

    fn destroy(&self, object_id: &ObjectId) {
        self.events
            .lock()
            .push(LifecycleEvent::Destroyed(object_id.clone()));
    }
}
