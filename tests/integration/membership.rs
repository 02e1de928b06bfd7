//! Group membership changes during voting

use std::time::Duration;

use replica_commit::transaction::{
    AllowListFilter, FailureCause, GroupView, PeerId, TransactionEvent, TransactionState,
};

use super::{peer, Harness};

// ============================================================================
// Late joins
// ============================================================================

#[tokio::test]
async fn test_late_joiner_becomes_participant_and_gets_request() {
    let h = Harness::new(&["node-a"]);
    h.activate().await;

    h.join("node-c").await;

    assert_eq!(h.transport.create_requests(), vec![peer("node-a"), peer("node-c")]);
    assert!(h.coordinator.snapshot().participants.contains(&peer("node-c")));
}

#[tokio::test]
async fn test_no_commit_while_late_joiner_unacknowledged() {
    let h = Harness::new(&["node-a"]);
    h.activate().await;
    h.join("node-c").await;

    h.vote_yes("node-a").await;
    assert_eq!(h.coordinator.state(), TransactionState::Voting);

    h.vote_yes("node-c").await;
    assert_eq!(h.coordinator.state(), TransactionState::Committed);
}

#[tokio::test]
async fn test_join_after_decision_ignored() {
    let h = Harness::new(&["node-a"]);
    h.activate().await;
    h.vote_yes("node-a").await;

    h.join("node-c").await;

    assert_eq!(h.transport.create_requests(), vec![peer("node-a")]);
    assert!(h.coordinator.wait_to_commit().await.is_ok());
}

#[tokio::test]
async fn test_departed_peer_cannot_rejoin_same_transaction() {
    let h = Harness::with(&["node-a", "node-b"], |c| c.with_failure_threshold(1));
    h.activate().await;

    h.depart("node-a").await;
    h.join("node-a").await;

    let snapshot = h.coordinator.snapshot();
    assert!(!snapshot.participants.contains(&peer("node-a")));
    assert_eq!(h.transport.create_requests().len(), 2);
}

#[tokio::test]
async fn test_joiner_bypasses_membership_filter() {
    let h = Harness::with(&["node-a", "node-b"], |c| {
        c.with_membership_filter(AllowListFilter::new(["node-a"]))
    });
    h.activate().await;
    assert_eq!(h.transport.create_requests(), vec![peer("node-a")]);

    h.join("node-z").await;
    assert_eq!(h.transport.create_requests(), vec![peer("node-a"), peer("node-z")]);
}

#[tokio::test]
async fn test_own_join_ignored() {
    let h = Harness::new(&["node-a"]);
    h.activate().await;
    h.coordinator
        .on_event(TransactionEvent::MemberJoined(peer("node-p")))
        .await;

    assert_eq!(h.coordinator.snapshot().participants.len(), 1);
}

// ============================================================================
// Departures
// ============================================================================

#[tokio::test]
async fn test_departure_recorded_exactly_once() {
    let h = Harness::with(&["node-a", "node-b", "node-c"], |c| {
        c.with_failure_threshold(2)
    });
    h.activate().await;

    h.depart("node-a").await;
    h.depart("node-a").await;
    h.vote_no("node-a", "after leaving").await;

    let snapshot = h.coordinator.snapshot();
    assert_eq!(snapshot.failures.len(), 1);
    assert_eq!(snapshot.failures.get(&peer("node-a")), Some(&FailureCause::Departed));
    assert_eq!(snapshot.state, TransactionState::Voting);
}

#[tokio::test]
async fn test_one_departure_within_threshold_commits() {
    let h = Harness::with(&["node-a", "node-b", "node-c"], |c| {
        c.with_failure_threshold(1)
    });
    h.activate().await;

    h.depart("node-b").await;
    h.vote_yes("node-a").await;
    h.vote_yes("node-c").await;

    h.coordinator.wait_to_commit().await.unwrap();
    assert_eq!(h.transport.commit_notices(), vec![peer("node-a"), peer("node-c")]);
}

#[tokio::test]
async fn test_departure_of_acknowledged_peer_counts() {
    let h = Harness::new(&["node-a", "node-b"]);
    h.activate().await;

    h.vote_yes("node-a").await;
    h.depart("node-a").await;

    let err = h.coordinator.wait_to_commit().await.unwrap_err();
    assert_eq!(err.failures.get(&peer("node-a")), Some(&FailureCause::Departed));
    // Departed peers are not sent the abort
    assert_eq!(h.transport.abort_notices(), vec![peer("node-b")]);
}

#[tokio::test]
async fn test_departure_of_bystander_ignored() {
    let h = Harness::with(&["node-a", "node-b"], |c| {
        c.with_membership_filter(AllowListFilter::new(["node-a"]))
    });
    h.activate().await;

    h.depart("node-b").await;

    assert!(h.coordinator.snapshot().failures.is_empty());
    assert_eq!(h.coordinator.state(), TransactionState::Voting);
}

// ============================================================================
// Participant selection
// ============================================================================

#[tokio::test]
async fn test_filter_returning_none_selects_everyone() {
    let h = Harness::with(&["node-a", "node-b"], |c| {
        c.with_membership_filter(|_: &[PeerId]| -> Option<Vec<PeerId>> { None })
    });
    h.activate().await;

    assert_eq!(h.transport.create_requests().len(), 2);
}

#[tokio::test]
async fn test_filter_selecting_nobody_commits_immediately() {
    let h = Harness::with(&["node-a", "node-b"], |c| {
        c.with_membership_filter(|_: &[PeerId]| -> Option<Vec<PeerId>> { Some(Vec::new()) })
    });
    h.activate().await;

    assert_eq!(h.coordinator.state(), TransactionState::Committed);
    assert!(h.transport.create_requests().is_empty());
}

#[tokio::test]
async fn test_disconnected_view_commits_locally() {
    let h = Harness::new(&["node-a"]);
    h.coordinator.begin_as_primary(GroupView::Disconnected).await;

    assert_eq!(h.coordinator.state(), TransactionState::Committed);
    tokio::time::timeout(Duration::from_secs(1), h.coordinator.wait_to_commit())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.lifecycle.completed_count(), 1);
}
