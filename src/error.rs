//! Error types for replica-commit
//!
//! This module defines the error hierarchy for the creation transaction.
//! Errors are categorized by where they arise and include recovery hints.
//!
//! Only [`AbortError`] is ever returned to the caller of
//! [`TransactionCoordinator::wait_to_commit`](crate::transaction::TransactionCoordinator::wait_to_commit).
//! [`SendError`] and [`LateFailure`] are bookkeeping values that the
//! coordinator records and logs while voting is in progress.
//! [`ReplicaCommitError`] is what the simulation entry points return.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::transaction::{FailureCause, ObjectId, PeerId};

/// Top-level error type for replica-commit
#[derive(Debug, Error)]
pub enum ReplicaCommitError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The creation transaction was aborted
    #[error("Transaction error: {0}")]
    Abort(#[from] AbortError),

}

impl ReplicaCommitError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(e) => e.is_recoverable(),
            Self::Abort(e) => e.is_recoverable(),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are generally not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// A per-peer delivery failure
///
/// Sending the creation request, the acknowledgment, or a commit notice can
/// fail independently for each peer. Only the replica's acknowledgment send
/// is fatal; everywhere else the failure is recorded and voting continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The transport did not complete the send within the send timeout
    #[error("Send to {peer} timed out after {timeout_ms}ms")]
    Timeout { peer: PeerId, timeout_ms: u64 },

    /// The transport refused the message
    #[error("Send to {peer} rejected: {reason}")]
    Rejected { peer: PeerId, reason: String },

    /// The transport's delivery channel is gone
    #[error("Delivery channel to {peer} is closed")]
    ChannelClosed { peer: PeerId },
}

impl SendError {
    /// Create a rejection error
    pub fn rejected(peer: PeerId, reason: impl Into<String>) -> Self {
        Self::Rejected {
            peer,
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(peer: PeerId, timeout: Duration) -> Self {
        Self::Timeout {
            peer,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Peer the send was addressed to
    #[must_use]
    pub fn peer(&self) -> &PeerId {
        match self {
            Self::Timeout { peer, .. } | Self::Rejected { peer, .. } | Self::ChannelClosed { peer } => {
                peer
            }
        }
    }

    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Rejected { .. } => true,
            Self::ChannelClosed { .. } => false,
        }
    }
}

/// Why a creation transaction was aborted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// More participants failed than the configured threshold tolerates
    FailureThresholdExceeded { failed: usize, threshold: usize },

    /// No decision was reached before the deadline
    Timeout { timeout: Duration },

    /// The replica could not send its acknowledgment to the coordinator
    AcknowledgeFailed(SendError),

    /// The replica reported a local creation failure to the coordinator
    Rejected(String),

    /// The replica was told by the coordinator that the creation aborted
    CoordinatorAborted,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailureThresholdExceeded { failed, threshold } => {
                write!(f, "{failed} participant(s) failed, threshold is {threshold}")
            }
            Self::Timeout { timeout } => write!(f, "timed out after {}ms", timeout.as_millis()),
            Self::AcknowledgeFailed(e) => write!(f, "acknowledgment failed: {e}"),
            Self::Rejected(cause) => write!(f, "rejected locally: {cause}"),
            Self::CoordinatorAborted => write!(f, "aborted by the coordinator"),
        }
    }
}

/// The creation transaction was aborted
///
/// Carries the participants that had not yet voted and the failures that had
/// been recorded at the moment the abort was decided.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Creation of {object_id} aborted: {reason} ({} outstanding, {} failed)", .participants.len(), .failures.len())]
pub struct AbortError {
    /// Object whose creation was rolled back
    pub object_id: ObjectId,
    /// Why the abort was decided
    pub reason: AbortReason,
    /// Participants still awaiting a vote
    pub participants: BTreeSet<PeerId>,
    /// Participants that reported or suffered a failure
    pub failures: BTreeMap<PeerId, FailureCause>,
}

impl AbortError {
    /// Whether the abort was caused by the deadline elapsing
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.reason, AbortReason::Timeout { .. })
    }

    /// An aborted creation may be attempted again from scratch
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.reason, AbortReason::Rejected(_))
    }
}

/// A failure that arrived after the coordinator already decided to commit
///
/// The peer has been (or will be) told to commit, so the failure cannot
/// revert anything. It is kept for observability only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Late failure from {peer} for {object_id} (sequence {sequence}): {cause}")]
pub struct LateFailure {
    /// Object the response refers to
    pub object_id: ObjectId,
    /// Peer that reported the failure
    pub peer: PeerId,
    /// Sequence number carried by the response
    pub sequence: i64,
    /// Reported cause
    pub cause: String,
}
