//! Primary-side voting and decision tests
//!
//! # Test Categories
//!
//! 1. Commit: all participants acknowledge
//! 2. Threshold: failures up to and beyond the tolerated count
//! 3. Timeout: silent participants and the bounded wait
//! 4. After the decision: repeated waits, late responses

use std::time::Duration;

use replica_commit::error::AbortReason;
use replica_commit::transaction::{FailureCause, LifecycleEvent, ObjectId, TransactionState};
use tokio::time::Instant;

use super::{peer, Harness, OBJECT};

// ============================================================================
// Commit
// ============================================================================

#[tokio::test]
async fn test_three_participants_commit_and_receive_notice() {
    let h = Harness::new(&["node-p", "node-a", "node-b", "node-c"]);
    h.activate().await;

    assert_eq!(
        h.transport.create_requests(),
        vec![peer("node-a"), peer("node-b"), peer("node-c")]
    );

    for p in ["node-a", "node-b", "node-c"] {
        h.vote_yes(p).await;
    }

    h.coordinator.wait_to_commit().await.unwrap();

    let mut notified = h.transport.commit_notices();
    notified.sort();
    assert_eq!(notified, vec![peer("node-a"), peer("node-b"), peer("node-c")]);
    assert_eq!(
        h.lifecycle.events(),
        vec![LifecycleEvent::Completed(ObjectId::from(OBJECT))]
    );
}

#[tokio::test]
async fn test_commit_returns_before_timeout() {
    let h = Harness::with(&["node-a", "node-b"], |c| {
        c.with_timeout(Duration::from_secs(10))
    });
    h.activate().await;

    let coordinator = h.coordinator.clone();
    let waiter = tokio::spawn(async move { coordinator.wait_to_commit().await });

    h.vote_yes("node-a").await;
    h.vote_yes("node-b").await;

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("wait_to_commit did not wake up")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_payload_replicated_to_participants() {
    let h = Harness::with(&["node-a"], |c| c.with_payload(&b"initial-state"[..]));
    h.activate().await;

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    match &sent[0].1 {
        replica_commit::transaction::PeerMessage::CreateRequest(request) => {
            assert_eq!(&request.payload[..], b"initial-state");
            assert_eq!(request.sender, peer("node-p"));
        }
        other => panic!("unexpected message: {other:?}"),
    }
}

// ============================================================================
// Threshold
// ============================================================================

#[tokio::test]
async fn test_one_failure_with_threshold_zero_aborts_with_exact_failures() {
    let h = Harness::new(&["node-a", "node-b"]);
    h.activate().await;
    h.vote_no("node-a", "class not found").await;

    let err = h.coordinator.wait_to_commit().await.unwrap_err();

    assert_eq!(err.failures.len(), 1);
    assert_eq!(
        err.failures.get(&peer("node-a")),
        Some(&FailureCause::Remote("class not found".into()))
    );
    assert!(matches!(
        err.reason,
        AbortReason::FailureThresholdExceeded { failed: 1, threshold: 0 }
    ));
    assert!(h.transport.commit_notices().is_empty());
    assert_eq!(h.transport.abort_notices(), vec![peer("node-b")]);
    assert_eq!(h.lifecycle.destroyed_count(), 1);
    assert_eq!(h.lifecycle.completed_count(), 0);
}

#[tokio::test]
async fn test_failures_within_threshold_commit() {
    let h = Harness::with(&["node-a", "node-b", "node-c"], |c| {
        c.with_failure_threshold(1)
    });
    h.activate().await;

    h.vote_no("node-a", "disk full").await;
    h.vote_yes("node-b").await;
    assert_eq!(h.coordinator.state(), TransactionState::Voting);
    h.vote_yes("node-c").await;

    h.coordinator.wait_to_commit().await.unwrap();
    // Only the peers that acknowledged are told to commit
    assert_eq!(h.transport.commit_notices(), vec![peer("node-b"), peer("node-c")]);
}

#[tokio::test]
async fn test_threshold_checked_before_completion() {
    let h = Harness::new(&["node-a", "node-b"]);
    h.activate().await;

    h.vote_yes("node-a").await;
    h.depart("node-b").await;

    // No participant is outstanding, but one failure exceeds a zero threshold
    let err = h.coordinator.wait_to_commit().await.unwrap_err();
    assert!(err.participants.is_empty());
    assert_eq!(err.failures.get(&peer("node-b")), Some(&FailureCause::Departed));
}

#[tokio::test]
async fn test_undeliverable_request_counts_toward_threshold() {
    let transport = std::sync::Arc::new(replica_commit::transaction::MockTransport::new());
    transport.fail_create_request("node-b", "host unreachable");
    let h = Harness::with_transport(&["node-a", "node-b"], transport, |c| {
        c.with_failure_threshold(1)
    });
    h.activate().await;
    h.vote_yes("node-a").await;

    h.coordinator.wait_to_commit().await.unwrap();
    let snapshot = h.coordinator.snapshot();
    assert!(matches!(
        snapshot.failures.get(&peer("node-b")),
        Some(FailureCause::SendFailed(_))
    ));
}

// ============================================================================
// Timeout
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_silent_participant_times_out_after_deadline() {
    let h = Harness::with(&["node-a"], |c| c.with_timeout(Duration::from_millis(50)));
    h.activate().await;

    let start = Instant::now();
    let err = h.coordinator.wait_to_commit().await.unwrap_err();

    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(err.is_timeout());
    assert!(err.participants.contains(&peer("node-a")));
    assert_eq!(h.coordinator.state(), TransactionState::Aborted);
    assert!(h.coordinator.snapshot().participants.contains(&peer("node-a")));
    // The silent participant may still hold a replica
    assert_eq!(h.transport.abort_notices(), vec![peer("node-a")]);
}

#[tokio::test(start_paused = true)]
async fn test_decided_outcome_returned_immediately() {
    let h = Harness::with(&["node-a"], |c| c.with_timeout(Duration::from_millis(50)));
    h.activate().await;
    let first = h.coordinator.wait_to_commit().await.unwrap_err();

    let start = Instant::now();
    let second = h.coordinator.wait_to_commit().await.unwrap_err();

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(first, second);
    assert_eq!(h.lifecycle.destroyed_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_vote_after_timeout_is_too_late() {
    let h = Harness::with(&["node-a"], |c| c.with_timeout(Duration::from_millis(50)));
    h.activate().await;
    h.coordinator.wait_to_commit().await.unwrap_err();

    h.vote_yes("node-a").await;

    assert_eq!(h.coordinator.state(), TransactionState::Aborted);
    assert!(h.transport.commit_notices().is_empty());
    // Already told at the deadline
    assert_eq!(h.transport.abort_notices(), vec![peer("node-a")]);
}

// ============================================================================
// After the decision
// ============================================================================

#[tokio::test]
async fn test_late_failure_after_commit_is_only_recorded() {
    let h = Harness::new(&["node-a"]);
    h.activate().await;
    h.vote_yes("node-a").await;
    h.coordinator.wait_to_commit().await.unwrap();

    h.vote_no("node-a", "constructor threw").await;

    let snapshot = h.coordinator.snapshot();
    assert_eq!(snapshot.state, TransactionState::Committed);
    assert_eq!(snapshot.late_failures.len(), 1);
    assert_eq!(snapshot.late_failures[0].peer, peer("node-a"));
    assert_eq!(h.lifecycle.destroyed_count(), 0);
    assert!(h.coordinator.wait_to_commit().await.is_ok());
}

#[tokio::test]
async fn test_repeated_wait_after_commit_sends_no_extra_notices() {
    let h = Harness::new(&["node-a", "node-b"]);
    h.activate().await;
    h.vote_yes("node-a").await;
    h.vote_yes("node-b").await;

    for _ in 0..3 {
        h.coordinator.wait_to_commit().await.unwrap();
    }

    assert_eq!(h.transport.commit_notices().len(), 2);
    assert_eq!(h.lifecycle.completed_count(), 1);
}
