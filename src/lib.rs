//! replica-commit: two-phase commit for replicated object creation
//!
//! When a peer creates an object that must exist on every member of its
//! group, it cannot simply broadcast and hope. This crate coordinates the
//! creation as a two-phase commit: the creating peer (the primary) replicates
//! the object, collects one acknowledgment per participant, and commits only
//! when enough of them succeeded within a deadline. Otherwise the partially
//! created object is torn down everywhere.
//!
//! # Features
//!
//! - **Dynamic membership**: peers joining during voting become participants;
//!   peers leaving count as failures
//! - **Failure threshold**: tolerate up to N participant failures
//! - **Bounded wait**: the primary aborts when the deadline passes
//! - **Pluggable transport**: any messaging layer behind [`PeerTransport`](transaction::PeerTransport)
//! - **Concurrent events**: one ledger lock, no lost wakeups
//!
//! # Architecture
//!
//! ```text
//! Container events ──► TransactionCoordinator ──► PeerTransport ──► peers
//!                            │
//!                            ▼
//!                     ObjectLifecycle (commit / destroy)
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use replica_commit::transaction::{
//!     NoOpTransport, ObjectId, PeerId, StaticGroup, TransactionCoordinator, TransactionEvent,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let group = StaticGroup::connected(["node-p", "node-a", "node-b"]);
//! let coordinator = TransactionCoordinator::primary(
//!     ObjectId::from("doc-1"),
//!     PeerId::from("node-p"),
//!     Arc::new(group),
//!     Arc::new(NoOpTransport),
//! );
//!
//! coordinator.on_event(TransactionEvent::Activated).await;
//! // ... deliver CreateResponse / MemberDeparted / MemberJoined events ...
//! coordinator.wait_to_commit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`error`]: Error types
//! - [`simulation`]: In-process group runner
//! - [`transaction`]: Coordinator, ledger, transport, and events

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod error;
pub mod simulation;
pub mod transaction;

// Re-export commonly used types at the crate root
pub use config::{Config, LogConfig, TransactionConfig};
pub use error::{AbortError, AbortReason, ConfigError, LateFailure, ReplicaCommitError, SendError};
pub use transaction::{
    GroupContext, GroupMembershipFilter, ObjectId, ObjectLifecycle, PeerId, PeerTransport,
    TransactionCoordinator, TransactionEvent, TransactionState,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
