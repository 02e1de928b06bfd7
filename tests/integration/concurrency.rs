//! Concurrent event delivery
//!
//! Events for one coordinator may arrive from many tasks at once. These tests
//! check that the ledger stays consistent and that the waiter never misses the
//! decision.

use std::sync::Arc;
use std::time::Duration;

use replica_commit::transaction::{MockTransport, TransactionEvent, TransactionState};
use replica_commit::ReplicaCommitError;

use super::{no, peer, yes, Harness};

fn members(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("node-{i}")).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_votes_commit_exactly_once() {
    let names = members(32);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let h = Harness::new(&refs);
    h.activate().await;

    let coordinator = h.coordinator.clone();
    let waiter = tokio::spawn(async move { coordinator.wait_to_commit().await });

    let handles: Vec<_> = names
        .iter()
        .map(|name| {
            let coordinator = h.coordinator.clone();
            let event = yes(name);
            tokio::spawn(async move { coordinator.on_event(event).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(h.transport.commit_notices().len(), 32);
    assert_eq!(h.lifecycle.completed_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_departures_and_votes_keep_ledger_consistent() {
    let names = members(20);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let h = Harness::with(&refs, |c| c.with_failure_threshold(100));
    h.activate().await;

    // Even peers vote yes, odd peers leave; every peer also gets a duplicate
    let mut handles = Vec::new();
    for (i, name) in names.iter().enumerate() {
        for _ in 0..2 {
            let coordinator = h.coordinator.clone();
            let event = if i % 2 == 0 {
                yes(name)
            } else {
                TransactionEvent::MemberDeparted(peer(name))
            };
            handles.push(tokio::spawn(async move { coordinator.on_event(event).await }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    h.coordinator.wait_to_commit().await.unwrap();

    let snapshot = h.coordinator.snapshot();
    assert_eq!(snapshot.acknowledged.len(), 10);
    assert_eq!(snapshot.failures.len(), 10);
    assert!(snapshot.participants.is_empty());
    for ack in &snapshot.acknowledged {
        assert!(!snapshot.failures.contains_key(ack));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_failure_and_success_decide_once() {
    let h = Harness::new(&["node-a", "node-b"]);
    h.activate().await;

    let a = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.on_event(no("node-a", "boom")).await })
    };
    let b = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.on_event(yes("node-b")).await })
    };
    a.await.unwrap();
    b.await.unwrap();

    assert_eq!(h.coordinator.state(), TransactionState::Aborted);
    assert!(h.coordinator.wait_to_commit().await.is_err());
    assert_eq!(h.lifecycle.destroyed_count(), 1);
    assert_eq!(h.lifecycle.completed_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_transport_does_not_block_votes() {
    let transport = Arc::new(MockTransport::new());
    transport.set_delay(50);
    let h = Harness::with_transport(&["node-a", "node-b"], transport, |c| c);

    // Activation is still sending while votes arrive on other tasks
    let activation = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.on_event(TransactionEvent::Activated).await })
    };
    while h.coordinator.state() != TransactionState::Voting {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    h.vote_yes("node-a").await;
    h.vote_yes("node-b").await;
    activation.await.unwrap();

    h.coordinator.wait_to_commit().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_join_racing_last_vote_never_commits_past_joiner() {
    for _ in 0..200 {
        let h = Harness::new(&["node-a"]);
        h.activate().await;

        let join = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .on_event(TransactionEvent::MemberJoined(peer("node-j")))
                    .await;
            })
        };
        let vote = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.on_event(yes("node-a")).await })
        };
        join.await.unwrap();
        vote.await.unwrap();

        let snapshot = h.coordinator.snapshot();
        let requests = h.transport.create_requests();
        match snapshot.state {
            // The join won: the joiner must be waited for
            TransactionState::Voting => {
                assert!(snapshot.participants.contains(&peer("node-j")));
                assert!(requests.contains(&peer("node-j")));
            }
            // The vote won: the joiner was never asked to create a replica
            TransactionState::Committed => {
                assert!(!requests.contains(&peer("node-j")));
                assert!(snapshot.participants.is_empty());
                assert_eq!(snapshot.acknowledged, vec![peer("node-a")]);
            }
            state => panic!("unexpected state {state}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_rejections_tear_down_once() {
    let h = Harness::new(&["node-a", "node-b"]);
    h.activate().await;

    let handles: Vec<_> = [no("node-a", "boom"), no("node-b", "boom")]
        .into_iter()
        .map(|event| {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.on_event(event).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let err: ReplicaCommitError = h.coordinator.wait_to_commit().await.unwrap_err().into();
    assert!(matches!(err, ReplicaCommitError::Abort(_)));
    // Teardown and its broadcast ran once, whichever vote decided
    assert_eq!(h.lifecycle.destroyed_count(), 1);
    assert_eq!(h.transport.abort_notices().len(), 1);
}
