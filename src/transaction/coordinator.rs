//! Transaction coordinator
//!
//! Drives the creation of one replicated object. On the primary it computes
//! the participants, replicates the creation request, collects votes, and
//! decides; on a replica it acknowledges and waits for the commit notice.
//!
//! # Protocol Overview
//!
//! ```text
//! Primary                                   Replica
//!    │ Activated                                │
//!    │  filter(group) → participants            │
//!    │  state = Voting                          │
//!    │ ── CreateRequest ──────────────────────► │ Activated
//!    │ ◄───────────────────── CreateResponse ── │  state = Prepared
//!    │  evaluate: failures > threshold? abort   │
//!    │            participants empty? commit    │
//!    │ ── CommitNotice ───────────────────────► │  state = Committed
//!    │    or, on abort                          │
//!    │ ── AbortNotice ────────────────────────► │  state = Aborted, destroy
//! ```
//!
//! # Locking
//!
//! Every read and write of the [`ParticipantLedger`] happens under one
//! `parking_lot::Mutex`. The lock is never held across an `.await`: sends
//! go out after the ledger has been updated, and a failed send is folded back
//! in under the lock. Every mutation notifies waiters so that
//! [`TransactionCoordinator::wait_to_commit`] re-evaluates completion.
//!
//! # Failure Handling
//!
//! - **Vote failure / departure / undeliverable request**: recorded in the
//!   failure map; aborts only once the failure threshold is exceeded
//! - **Deadline**: aborts with the outstanding participants
//! - **Failure after commit**: kept as a [`LateFailure`], never escalated
//! - **Commit or abort notice not delivered**: logged, not escalated
//! - **Abort**: every peer that voted yes or was still expected to vote gets
//!   an [`AbortNotice`]; a success arriving after the abort gets one too

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::filter::GroupMembershipFilter;
use super::ledger::{FailureCause, LedgerSnapshot, ParticipantLedger};
use super::lifecycle::{NoOpLifecycle, ObjectLifecycle};
use super::messages::{AbortNotice, CommitNotice, CreateRequest, CreateResponse, TransactionEvent};
use super::peer::{GroupContext, GroupView, ObjectId, PeerId};
use super::replica::ReplicaResponder;
use super::state::{Role, TransactionState};
use super::transport::{send_within, PeerTransport};
use crate::config::TransactionConfig;
use crate::error::{AbortError, AbortReason, LateFailure, SendError};

/// Outcome observed by one pass of the wait loop
enum Observed {
    Pending(Option<Instant>),
    Committed(Option<Vec<PeerId>>),
    Aborted(Option<Vec<PeerId>>, AbortError),
}

/// Two-phase commit coordinator for one replicated object
///
/// Share it behind an `Arc`: any number of event-delivery tasks may call
/// [`on_event`](Self::on_event) concurrently while one task awaits
/// [`wait_to_commit`](Self::wait_to_commit).
pub struct TransactionCoordinator {
    /// Object being created
    object_id: ObjectId,
    /// Local peer
    local: PeerId,
    /// Whether this peer decides the outcome
    role: Role,
    /// Creation payload replicated to participants
    payload: Bytes,
    /// Timeout and failure threshold
    config: TransactionConfig,
    /// Optional participant selection
    membership_filter: Option<Arc<dyn GroupMembershipFilter>>,
    /// Outbound messages
    transport: Arc<dyn PeerTransport>,
    /// Group membership (primary only)
    group: Option<Arc<dyn GroupContext>>,
    /// Local object callbacks
    lifecycle: Arc<dyn ObjectLifecycle>,
    /// Acknowledgment sender (replica only)
    replica: Option<ReplicaResponder>,
    /// All mutable transaction state
    ledger: Mutex<ParticipantLedger>,
    /// Signalled after every ledger mutation
    changed: Notify,
}

impl TransactionCoordinator {
    /// Create the coordinator for an object created by this peer
    ///
    /// # Example
    ///
    /// ```ignore
    /// let coordinator = TransactionCoordinator::primary(
    ///     ObjectId::from("doc-1"),
    ///     PeerId::from("node-p"),
    ///     Arc::new(group),
    ///     transport,
    /// )
    /// .with_failure_threshold(1);
    /// ```
    pub fn primary(
        object_id: ObjectId,
        local: PeerId,
        group: Arc<dyn GroupContext>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self::build(object_id, local, Role::Primary, Some(group), None, transport)
    }

    /// Create the coordinator for a replica of an object created by `home`
    pub fn replica(
        object_id: ObjectId,
        local: PeerId,
        home: PeerId,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        let responder = ReplicaResponder::new(local.clone(), home, object_id.clone());
        Self::build(object_id, local, Role::Replica, None, Some(responder), transport)
    }

    fn build(
        object_id: ObjectId,
        local: PeerId,
        role: Role,
        group: Option<Arc<dyn GroupContext>>,
        replica: Option<ReplicaResponder>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            ledger: Mutex::new(ParticipantLedger::new(object_id.clone())),
            object_id,
            local,
            role,
            payload: Bytes::new(),
            config: TransactionConfig::default(),
            membership_filter: None,
            transport,
            group,
            lifecycle: Arc::new(NoOpLifecycle),
            replica,
            changed: Notify::new(),
        }
    }

    /// Set timeout and failure threshold
    #[must_use]
    pub fn with_config(mut self, config: TransactionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the deadline for [`wait_to_commit`](Self::wait_to_commit)
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the number of participant failures tolerated before aborting
    #[must_use]
    pub fn with_failure_threshold(mut self, failure_threshold: usize) -> Self {
        self.config.failure_threshold = failure_threshold;
        self
    }

    /// Set the participant filter
    #[must_use]
    pub fn with_membership_filter(mut self, filter: impl GroupMembershipFilter + 'static) -> Self {
        self.membership_filter = Some(Arc::new(filter));
        self
    }

    /// Set the local object lifecycle callbacks
    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn ObjectLifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Set the creation payload replicated to participants
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Object being created
    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    /// Local peer
    pub fn local(&self) -> &PeerId {
        &self.local
    }

    /// Role of the local peer
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current transaction phase
    pub fn state(&self) -> TransactionState {
        self.ledger.lock().state()
    }

    /// Copy of the participant ledger
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.lock().snapshot()
    }

    /// Configured deadline
    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Configured failure threshold
    pub fn failure_threshold(&self) -> usize {
        self.config.failure_threshold
    }

    // =========================================================================
    // Activation
    // =========================================================================

    /// Start the transaction on the primary
    ///
    /// Participants are the filtered group members (all members when there
    /// is no filter or the filter returns `None`), excluding the local peer.
    /// A disconnected group commits immediately.
    pub async fn begin_as_primary(&self, view: GroupView) {
        if self.role != Role::Primary {
            warn!(object = %self.object_id, "begin_as_primary called on a replica");
            return;
        }

        let participants = {
            let mut ledger = self.ledger.lock();
            if !ledger.claim_activation() {
                debug!(object = %self.object_id, "Already activated, ignoring");
                return;
            }

            let participants = match view {
                GroupView::Disconnected => {
                    ledger.commit_unilaterally();
                    info!(object = %self.object_id, "Not connected to a group, committed locally");
                    Vec::new()
                }
                GroupView::Connected { members } => {
                    let selected = self
                        .membership_filter
                        .as_ref()
                        .and_then(|f| f.filter_participants(&members))
                        .unwrap_or(members);
                    let added = ledger.begin_voting(selected, &self.local);
                    info!(
                        object = %self.object_id,
                        participants = added.len(),
                        threshold = self.config.failure_threshold,
                        "Voting started"
                    );
                    self.evaluate(&mut ledger);
                    added
                }
            };
            self.changed.notify_waiters();
            participants
        };

        for peer in participants {
            if let Err(e) = self.replicate_to(&peer).await {
                self.record_send_failure(&peer, e).await;
            }
        }
    }

    /// Acknowledge the creation on a replica
    ///
    /// One send attempt; success moves the replica to `Prepared`, failure to
    /// `Aborted` with immediate local teardown.
    pub async fn begin_as_replica(&self) {
        self.acknowledge(None).await;
    }

    /// Refuse the creation on a replica
    ///
    /// Reports `cause` to the coordinator and aborts locally.
    pub async fn reject_as_replica(&self, cause: impl Into<String>) {
        self.acknowledge(Some(cause.into())).await;
    }

    async fn acknowledge(&self, failure: Option<String>) {
        let Some(responder) = &self.replica else {
            warn!(object = %self.object_id, "Acknowledgment requested on the primary");
            return;
        };

        if !self.ledger.lock().claim_activation() {
            debug!(object = %self.object_id, "Already activated, ignoring");
            return;
        }

        let result = responder
            .acknowledge(
                self.transport.as_ref(),
                failure.clone(),
                self.config.send_timeout(),
            )
            .await;

        let teardown = {
            let mut ledger = self.ledger.lock();
            match (result, failure) {
                (Ok(sequence), None) => {
                    if ledger.prepare() {
                        info!(object = %self.object_id, home = %responder.home(), sequence, "Replica prepared");
                    } else {
                        debug!(object = %self.object_id, sequence, state = %ledger.state(), "Decided while acknowledging");
                    }
                }
                (Ok(sequence), Some(cause)) => {
                    info!(object = %self.object_id, home = %responder.home(), sequence, cause = %cause, "Replica rejected creation");
                    ledger.abort_with(AbortReason::Rejected(cause));
                }
                (Err(e), _) => {
                    warn!(object = %self.object_id, home = %responder.home(), error = %e, "Replica aborted: acknowledgment failed");
                    ledger.abort_with(AbortReason::AcknowledgeFailed(e));
                }
            }
            let teardown = self.claim_teardown(&mut ledger);
            self.changed.notify_waiters();
            teardown
        };

        if let Some(recipients) = teardown {
            self.finish_abort(&recipients).await;
        }
    }

    // =========================================================================
    // Event dispatch
    // =========================================================================

    /// Handle one event from the hosting container
    ///
    /// Events that do not apply to the local role, or that arrive after a
    /// decision, are logged and otherwise ignored.
    pub async fn on_event(&self, event: TransactionEvent) {
        trace!(object = %self.object_id, role = %self.role, event = event.kind(), "Processing event");

        match event {
            TransactionEvent::Activated => match self.role {
                Role::Primary => {
                    let view = self
                        .group
                        .as_ref()
                        .map_or(GroupView::Disconnected, |g| g.view());
                    self.begin_as_primary(view).await;
                }
                Role::Replica => self.begin_as_replica().await,
            },
            TransactionEvent::MemberJoined(peer) => self.handle_joined(peer).await,
            TransactionEvent::CreateResponse(response) => {
                self.handle_create_response(response).await;
            }
            TransactionEvent::MemberDeparted(peer) => self.handle_departed(&peer).await,
            TransactionEvent::CommitReceived(notice) => self.handle_commit_received(&notice),
            TransactionEvent::AbortReceived(notice) => self.handle_abort_received(&notice).await,
        }
    }

    async fn handle_joined(&self, peer: PeerId) {
        if self.role != Role::Primary || peer == self.local {
            return;
        }

        let added = {
            let mut ledger = self.ledger.lock();
            let added = ledger.add_participant(&peer);
            if added {
                info!(object = %self.object_id, peer = %peer, outstanding = ledger.outstanding(), "Late joiner added to participants");
                self.changed.notify_waiters();
            } else {
                debug!(object = %self.object_id, peer = %peer, state = %ledger.state(), "Join ignored");
            }
            added
        };

        if added {
            if let Err(e) = self.replicate_to(&peer).await {
                self.record_send_failure(&peer, e).await;
            }
        }
    }

    async fn handle_create_response(&self, response: CreateResponse) {
        if self.role != Role::Primary {
            return;
        }
        if response.object_id != self.object_id {
            warn!(object = %self.object_id, other = %response.object_id, peer = %response.from, "Create response for another object");
            return;
        }

        let CreateResponse {
            from,
            sequence,
            failure_cause,
            ..
        } = response;

        let (commit_late, abort_late, teardown) = {
            let mut ledger = self.ledger.lock();
            let mut commit_late = false;
            let mut abort_late = false;

            match (ledger.state(), failure_cause) {
                (TransactionState::Voting, None) => {
                    if ledger.record_success(&from) {
                        debug!(object = %self.object_id, peer = %from, sequence, outstanding = ledger.outstanding(), "Participant voted yes");
                    } else {
                        debug!(object = %self.object_id, peer = %from, sequence, "Vote from non-participant ignored");
                    }
                    self.evaluate(&mut ledger);
                }
                (TransactionState::Voting, Some(cause)) => {
                    if ledger.record_failure(&from, FailureCause::Remote(cause.clone())) {
                        warn!(object = %self.object_id, peer = %from, sequence, cause = %cause, "Participant voted no");
                    }
                    self.evaluate(&mut ledger);
                }
                (TransactionState::Committed, None) => {
                    debug!(object = %self.object_id, peer = %from, sequence, "Vote after commit, sending commit notice");
                    commit_late = true;
                }
                (TransactionState::Committed, Some(cause)) => {
                    let late = LateFailure {
                        object_id: self.object_id.clone(),
                        peer: from.clone(),
                        sequence,
                        cause,
                    };
                    warn!(object = %self.object_id, error = %late, "Too late to vote no");
                    ledger.record_late_failure(late);
                }
                (TransactionState::Aborted, None) => {
                    // Peers outside the abort broadcast may still hold a replica
                    abort_late = !ledger.abort_recipients().contains(&from);
                    debug!(object = %self.object_id, peer = %from, sequence, notify = abort_late, "Vote after abort");
                }
                (state, _) => {
                    debug!(object = %self.object_id, peer = %from, sequence, state = %state, "Too late to vote");
                }
            }

            let teardown = self.claim_teardown(&mut ledger);
            self.changed.notify_waiters();
            (commit_late, abort_late, teardown)
        };

        if let Some(recipients) = teardown {
            self.finish_abort(&recipients).await;
        }
        if commit_late {
            self.send_commit_notice(&from).await;
        }
        if abort_late {
            self.send_abort_notice(&from).await;
        }
    }

    async fn handle_departed(&self, peer: &PeerId) {
        if self.role != Role::Primary {
            return;
        }

        let teardown = {
            let mut ledger = self.ledger.lock();
            if ledger.record_failure(peer, FailureCause::Departed) {
                warn!(object = %self.object_id, peer = %peer, failures = ledger.failure_count(), "Participant left during voting");
                self.evaluate(&mut ledger);
            } else {
                debug!(object = %self.object_id, peer = %peer, state = %ledger.state(), "Departure ignored");
            }
            let teardown = self.claim_teardown(&mut ledger);
            self.changed.notify_waiters();
            teardown
        };

        if let Some(recipients) = teardown {
            self.finish_abort(&recipients).await;
        }
    }

    fn handle_commit_received(&self, notice: &CommitNotice) {
        if self.role != Role::Replica {
            return;
        }
        if notice.object_id != self.object_id {
            warn!(object = %self.object_id, other = %notice.object_id, "Commit notice for another object");
            return;
        }

        let completed = {
            let mut ledger = self.ledger.lock();
            let completed = ledger.commit_prepared() && ledger.claim_finalization();
            if completed {
                info!(object = %self.object_id, "Replica committed");
            } else {
                debug!(object = %self.object_id, state = %ledger.state(), "Commit notice ignored");
            }
            self.changed.notify_waiters();
            completed
        };

        if completed {
            self.lifecycle.creation_completed(&self.object_id);
        }
    }

    async fn handle_abort_received(&self, notice: &AbortNotice) {
        if self.role != Role::Replica {
            return;
        }
        if notice.object_id != self.object_id {
            warn!(object = %self.object_id, other = %notice.object_id, "Abort notice for another object");
            return;
        }

        let teardown = {
            let mut ledger = self.ledger.lock();
            // A notice overtaking activation means the replica never acknowledges
            ledger.claim_activation();
            if ledger.state().is_terminal() {
                debug!(object = %self.object_id, state = %ledger.state(), "Abort notice ignored");
            } else {
                ledger.abort_with(AbortReason::CoordinatorAborted);
                info!(object = %self.object_id, "Replica aborted by coordinator");
            }
            let teardown = self.claim_teardown(&mut ledger);
            self.changed.notify_waiters();
            teardown
        };

        if let Some(recipients) = teardown {
            self.finish_abort(&recipients).await;
        }
    }

    // =========================================================================
    // Decision
    // =========================================================================

    /// Wait for the outcome of the transaction
    ///
    /// On the primary the wait is bounded by the configured timeout, counted
    /// from the first call. When the deadline passes without a decision the
    /// transaction aborts. On commit, every participant that voted yes is
    /// sent a commit notice (best-effort) and the local object is completed.
    /// Later calls return the decided outcome immediately.
    ///
    /// # Errors
    ///
    /// Returns [`AbortError`] with the outstanding participants and recorded
    /// failures when the transaction aborted.
    pub async fn wait_to_commit(&self) -> Result<(), AbortError> {
        loop {
            // Registered before the predicate is checked, so a notification
            // between the check and the await is not lost.
            let notified = self.changed.notified();

            let observed = {
                let mut ledger = self.ledger.lock();
                self.observe(&mut ledger)
            };

            match observed {
                Observed::Committed(finalize) => {
                    if let Some(acknowledged) = finalize {
                        self.finish_commit(&acknowledged).await;
                    }
                    return Ok(());
                }
                Observed::Aborted(teardown, error) => {
                    if let Some(recipients) = teardown {
                        self.finish_abort(&recipients).await;
                    }
                    return Err(error);
                }
                Observed::Pending(Some(deadline)) => {
                    trace!(object = %self.object_id, "Waiting for votes");
                    let _ = tokio::time::timeout_at(deadline, notified).await;
                }
                Observed::Pending(None) => notified.await,
            }
        }
    }

    fn observe(&self, ledger: &mut ParticipantLedger) -> Observed {
        let deadline = match self.role {
            Role::Primary => {
                self.evaluate(ledger);
                let deadline = ledger.deadline(self.config.timeout());
                if Instant::now() >= deadline && ledger.expire(self.config.timeout()) {
                    warn!(
                        object = %self.object_id,
                        outstanding = ledger.outstanding(),
                        failures = ledger.failure_count(),
                        timeout_ms = self.config.timeout_ms,
                        "Voting timed out"
                    );
                    self.changed.notify_waiters();
                }
                Some(deadline)
            }
            // No local timeout on the replica side
            Role::Replica => None,
        };

        match ledger.state() {
            TransactionState::Committed => {
                let finalize = ledger
                    .claim_finalization()
                    .then(|| ledger.acknowledged().to_vec());
                Observed::Committed(finalize)
            }
            TransactionState::Aborted => {
                let error = ledger.abort_error().cloned();
                match error {
                    Some(error) => Observed::Aborted(self.claim_teardown(ledger), error),
                    None => Observed::Pending(deadline),
                }
            }
            _ => Observed::Pending(deadline),
        }
    }

    /// Run completion evaluation; caller holds the ledger lock
    fn evaluate(&self, ledger: &mut ParticipantLedger) {
        match ledger.evaluate(self.config.failure_threshold) {
            Some(TransactionState::Committed) => {
                info!(object = %self.object_id, acknowledged = ledger.acknowledged().len(), failures = ledger.failure_count(), "Voting complete, committing");
            }
            Some(TransactionState::Aborted) => {
                warn!(object = %self.object_id, failures = ledger.failure_count(), threshold = self.config.failure_threshold, "Failure threshold exceeded, aborting");
            }
            _ => {}
        }
    }

    /// Claim the abort teardown; returns the peers to notify when claimed
    fn claim_teardown(&self, ledger: &mut ParticipantLedger) -> Option<Vec<PeerId>> {
        if ledger.state() != TransactionState::Aborted || !ledger.claim_finalization() {
            return None;
        }
        Some(match self.role {
            Role::Primary => ledger.abort_recipients(),
            Role::Replica => Vec::new(),
        })
    }

    async fn finish_abort(&self, recipients: &[PeerId]) {
        for peer in recipients {
            self.send_abort_notice(peer).await;
        }
        info!(object = %self.object_id, role = %self.role, notified = recipients.len(), "Tearing down partially created object");
        self.lifecycle.destroy(&self.object_id);
    }

    async fn finish_commit(&self, acknowledged: &[PeerId]) {
        for peer in acknowledged {
            self.send_commit_notice(peer).await;
        }
        info!(object = %self.object_id, notified = acknowledged.len(), "Creation committed");
        self.lifecycle.creation_completed(&self.object_id);
    }

    // =========================================================================
    // Sends
    // =========================================================================

    async fn replicate_to(&self, peer: &PeerId) -> Result<(), SendError> {
        let request = CreateRequest {
            sender: self.local.clone(),
            object_id: self.object_id.clone(),
            payload: self.payload.clone(),
        };
        debug!(object = %self.object_id, peer = %peer, "Replicating to participant");
        send_within(
            peer,
            self.config.send_timeout(),
            self.transport.send_create_request(peer, &request),
        )
        .await
    }

    async fn record_send_failure(&self, peer: &PeerId, error: SendError) {
        let teardown = {
            let mut ledger = self.ledger.lock();
            if ledger.record_failure(peer, FailureCause::SendFailed(error.clone())) {
                warn!(object = %self.object_id, peer = %peer, error = %error, "Creation request not delivered");
                self.evaluate(&mut ledger);
            }
            let teardown = self.claim_teardown(&mut ledger);
            self.changed.notify_waiters();
            teardown
        };

        if let Some(recipients) = teardown {
            self.finish_abort(&recipients).await;
        }
    }

    async fn send_commit_notice(&self, peer: &PeerId) {
        let notice = CommitNotice {
            object_id: self.object_id.clone(),
        };
        if let Err(e) = send_within(
            peer,
            self.config.send_timeout(),
            self.transport.send_commit_notice(peer, &notice),
        )
        .await
        {
            warn!(object = %self.object_id, peer = %peer, error = %e, "Commit notice not delivered");
        }
    }

    async fn send_abort_notice(&self, peer: &PeerId) {
        let notice = AbortNotice {
            object_id: self.object_id.clone(),
        };
        if let Err(e) = send_within(
            peer,
            self.config.send_timeout(),
            self.transport.send_abort_notice(peer, &notice),
        )
        .await
        {
            warn!(object = %self.object_id, peer = %peer, error = %e, "Abort notice not delivered");
        }
    }
}
