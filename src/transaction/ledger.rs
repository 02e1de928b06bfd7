//! Participant ledger
//!
//! The ledger is the single piece of mutable state of a creation
//! transaction: the phase, the participants still expected to vote, and the
//! participants that failed. The coordinator keeps it behind one mutex and
//! every read or write happens while holding that lock, so a departure, a
//! late join, and a completion check can never interleave.
//!
//! # Invariants
//!
//! - A peer is never both a participant and a failure.
//! - A participant leaves the participant set exactly once: on a successful
//!   vote (it moves to the acknowledged list) or on a failure (it moves to the
//!   failure map).
//! - A peer is written to the failure map at most once.
//! - Once `Committed` or `Aborted`, the state never changes again.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use super::peer::{ObjectId, PeerId};
use super::state::TransactionState;
use crate::error::{AbortError, AbortReason, LateFailure, SendError};

/// Why a participant counts as failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The peer left the group while voting was open
    Departed,
    /// The peer voted no
    Remote(String),
    /// The creation request could not be delivered
    SendFailed(SendError),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Departed => write!(f, "peer left the group"),
            Self::Remote(cause) => write!(f, "remote creation failed: {cause}"),
            Self::SendFailed(e) => write!(f, "creation request not delivered: {e}"),
        }
    }
}

/// Point-in-time copy of the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub state: TransactionState,
    pub participants: BTreeSet<PeerId>,
    pub failures: BTreeMap<PeerId, FailureCause>,
    pub acknowledged: Vec<PeerId>,
    pub late_failures: Vec<LateFailure>,
}

/// Mutable state of one creation transaction
#[derive(Debug)]
pub struct ParticipantLedger {
    object_id: ObjectId,
    state: TransactionState,
    participants: HashSet<PeerId>,
    failures: HashMap<PeerId, FailureCause>,
    acknowledged: Vec<PeerId>,
    late_failures: Vec<LateFailure>,
    abort: Option<AbortError>,
    deadline: Option<Instant>,
    activated: bool,
    finalized: bool,
}

impl ParticipantLedger {
    /// Create an empty ledger in the `Active` state
    pub fn new(object_id: ObjectId) -> Self {
        Self {
            object_id,
            state: TransactionState::Active,
            participants: HashSet::new(),
            failures: HashMap::new(),
            acknowledged: Vec::new(),
            late_failures: Vec::new(),
            abort: None,
            deadline: None,
            activated: false,
            finalized: false,
        }
    }

    /// Current phase
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Claim the one-time activation. Returns `false` if already claimed.
    pub fn claim_activation(&mut self) -> bool {
        !std::mem::replace(&mut self.activated, true)
    }

    /// Whether `peer` is still expected to vote
    pub fn is_participant(&self, peer: &PeerId) -> bool {
        self.participants.contains(peer)
    }

    /// Number of participants still expected to vote
    pub fn outstanding(&self) -> usize {
        self.participants.len()
    }

    /// Number of recorded failures
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Participants that voted yes, in vote order
    pub fn acknowledged(&self) -> &[PeerId] {
        &self.acknowledged
    }

    /// Peers holding a replica that an abort must reach: those that voted
    /// yes, then those still expected to vote (sorted)
    pub fn abort_recipients(&self) -> Vec<PeerId> {
        let mut outstanding: Vec<PeerId> = self.participants.iter().cloned().collect();
        outstanding.sort();
        self.acknowledged.iter().cloned().chain(outstanding).collect()
    }

    /// The abort decision, once made
    pub fn abort_error(&self) -> Option<&AbortError> {
        self.abort.as_ref()
    }

    /// Open voting with the initial participants
    ///
    /// `local` is never added. Returns the peers actually added, in input
    /// order without duplicates.
    pub fn begin_voting<I>(&mut self, participants: I, local: &PeerId) -> Vec<PeerId>
    where
        I: IntoIterator<Item = PeerId>,
    {
        if self.state != TransactionState::Active {
            return Vec::new();
        }
        self.state = TransactionState::Voting;

        participants
            .into_iter()
            .filter(|peer| peer != local)
            .filter(|peer| self.participants.insert(peer.clone()))
            .collect()
    }

    /// Extend the participant set with a peer that joined during voting
    ///
    /// Returns `false` if voting is not open or the peer already took part.
    pub fn add_participant(&mut self, peer: &PeerId) -> bool {
        if self.state != TransactionState::Voting
            || self.failures.contains_key(peer)
            || self.acknowledged.contains(peer)
        {
            return false;
        }
        self.participants.insert(peer.clone())
    }

    /// Record a yes vote. Returns `false` if `peer` was not awaiting a vote.
    pub fn record_success(&mut self, peer: &PeerId) -> bool {
        if self.state != TransactionState::Voting || !self.participants.remove(peer) {
            return false;
        }
        self.acknowledged.push(peer.clone());
        true
    }

    /// Record a failure for a peer taking part in the transaction
    ///
    /// Only peers that are participants or already acknowledged count; a
    /// peer is recorded at most once. Returns `false` if nothing changed.
    pub fn record_failure(&mut self, peer: &PeerId, cause: FailureCause) -> bool {
        if self.state != TransactionState::Voting || self.failures.contains_key(peer) {
            return false;
        }

        let was_participant = self.participants.remove(peer);
        let was_acknowledged = match self.acknowledged.iter().position(|p| p == peer) {
            Some(pos) => {
                self.acknowledged.remove(pos);
                true
            }
            None => false,
        };
        if !was_participant && !was_acknowledged {
            return false;
        }

        self.failures.insert(peer.clone(), cause);
        true
    }

    /// Decide the outcome if voting is complete
    ///
    /// The failure threshold is checked before the participant set, so a
    /// transaction that has both too many failures and no outstanding
    /// participants aborts. Returns the new state when a decision was made by
    /// this call.
    pub fn evaluate(&mut self, failure_threshold: usize) -> Option<TransactionState> {
        if self.state != TransactionState::Voting {
            return None;
        }

        if self.failures.len() > failure_threshold {
            let reason = AbortReason::FailureThresholdExceeded {
                failed: self.failures.len(),
                threshold: failure_threshold,
            };
            self.abort_with(reason);
            return Some(TransactionState::Aborted);
        }

        if self.participants.is_empty() {
            self.state = TransactionState::Committed;
            return Some(TransactionState::Committed);
        }

        None
    }

    /// Abort because the deadline elapsed. Returns `false` if already terminal.
    pub fn expire(&mut self, timeout: Duration) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.abort_with(AbortReason::Timeout { timeout });
        true
    }

    /// Abort for the given reason, capturing the current participants and
    /// failures. Has no effect once terminal.
    pub fn abort_with(&mut self, reason: AbortReason) {
        if self.state.is_terminal() {
            return;
        }
        self.state = TransactionState::Aborted;
        self.abort = Some(AbortError {
            object_id: self.object_id.clone(),
            reason,
            participants: self.participants.iter().cloned().collect(),
            failures: self
                .failures
                .iter()
                .map(|(peer, cause)| (peer.clone(), cause.clone()))
                .collect(),
        });
    }

    /// Commit without voting (no peers to coordinate)
    pub fn commit_unilaterally(&mut self) -> bool {
        if self.state != TransactionState::Active {
            return false;
        }
        self.state = TransactionState::Committed;
        true
    }

    /// Replica acknowledged the creation
    pub fn prepare(&mut self) -> bool {
        if self.state != TransactionState::Active {
            return false;
        }
        self.state = TransactionState::Prepared;
        true
    }

    /// Replica received the commit notice
    pub fn commit_prepared(&mut self) -> bool {
        if self.state != TransactionState::Prepared {
            return false;
        }
        self.state = TransactionState::Committed;
        true
    }

    /// Keep a failure that arrived after the commit decision
    pub fn record_late_failure(&mut self, late: LateFailure) {
        self.late_failures.push(late);
    }

    /// Deadline for the current wait, fixed on first use
    pub fn deadline(&mut self, timeout: Duration) -> Instant {
        *self.deadline.get_or_insert_with(|| Instant::now() + timeout)
    }

    /// Claim the one-time terminal side effects (commit broadcast or
    /// teardown). Returns `true` exactly once, after a terminal state.
    pub fn claim_finalization(&mut self) -> bool {
        if !self.state.is_terminal() || self.finalized {
            return false;
        }
        self.finalized = true;
        true
    }

    /// Copy of the ledger for inspection
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            state: self.state,
            participants: self.participants.iter().cloned().collect(),
            failures: self
                .failures
                .iter()
                .map(|(peer, cause)| (peer.clone(), cause.clone()))
                .collect(),
            acknowledged: self.acknowledged.clone(),
            late_failures: self.late_failures.clone(),
        }
    }
}
