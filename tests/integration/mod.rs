//! Integration tests for replica-commit
//!
//! These tests drive coordinators only through their public API: container
//! events in, transport sends and lifecycle callbacks out.
//!
//! # Test Organization
//!
//! - `voting`: primary-side decisions (commit, threshold abort, timeout)
//! - `membership`: late joins and departures during voting
//! - `concurrency`: events delivered from many tasks at once
//! - `group`: primary and replicas wired together over a channel transport
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --test integration_tests
//! ```

pub mod concurrency;
pub mod membership;
pub mod voting;

use std::sync::Arc;

use replica_commit::transaction::{
    CreateResponse, MockTransport, ObjectId, PeerId, RecordingLifecycle, StaticGroup,
    TransactionCoordinator, TransactionEvent,
};

/// Object id shared by every helper
pub const OBJECT: &str = "doc-1";

/// Primary peer id shared by every helper
pub const PRIMARY: &str = "node-p";

pub fn peer(id: &str) -> PeerId {
    PeerId::from(id)
}

/// A primary coordinator over `members` (which may include the primary)
pub struct Harness {
    pub coordinator: Arc<TransactionCoordinator>,
    pub transport: Arc<MockTransport>,
    pub lifecycle: Arc<RecordingLifecycle>,
    pub group: StaticGroup,
}

impl Harness {
    pub fn new(members: &[&str]) -> Self {
        Self::with(members, |c| c)
    }

    pub fn with(
        members: &[&str],
        configure: impl FnOnce(TransactionCoordinator) -> TransactionCoordinator,
    ) -> Self {
        let transport = Arc::new(MockTransport::new());
        Self::with_transport(members, transport, configure)
    }

    pub fn with_transport(
        members: &[&str],
        transport: Arc<MockTransport>,
        configure: impl FnOnce(TransactionCoordinator) -> TransactionCoordinator,
    ) -> Self {
        let lifecycle = Arc::new(RecordingLifecycle::new());
        let group = StaticGroup::connected(members.iter().copied());
        let coordinator = TransactionCoordinator::primary(
            ObjectId::from(OBJECT),
            peer(PRIMARY),
            Arc::new(group.clone()),
            transport.clone(),
        )
        .with_lifecycle(lifecycle.clone());

        Self {
            coordinator: Arc::new(configure(coordinator)),
            transport,
            lifecycle,
            group,
        }
    }

    pub async fn activate(&self) {
        self.coordinator.on_event(TransactionEvent::Activated).await;
    }

    pub async fn vote_yes(&self, from: &str) {
        self.coordinator.on_event(yes(from)).await;
    }

    pub async fn vote_no(&self, from: &str, cause: &str) {
        self.coordinator.on_event(no(from, cause)).await;
    }

    pub async fn depart(&self, who: &str) {
        self.group.leave(&peer(who));
        self.coordinator
            .on_event(TransactionEvent::MemberDeparted(peer(who)))
            .await;
    }

    pub async fn join(&self, who: &str) {
        self.group.join(who);
        self.coordinator
            .on_event(TransactionEvent::MemberJoined(peer(who)))
            .await;
    }
}

pub fn yes(from: &str) -> TransactionEvent {
    CreateResponse::success(peer(from), ObjectId::from(OBJECT), 0).into()
}

pub fn no(from: &str, cause: &str) -> TransactionEvent {
    CreateResponse::failure(peer(from), ObjectId::from(OBJECT), 0, cause).into()
}
