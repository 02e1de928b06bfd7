//! In-process group simulation
//!
//! Runs one creation transaction across a primary and N replicas that live
//! in the same process and talk over a [`ChannelTransport`]. A router task
//! plays the part of the hosting container: it turns every [`Envelope`] into
//! the matching [`TransactionEvent`] for the addressed peer, creates replica
//! coordinators when a creation request arrives, and makes configured peers
//! fail, leave the group, or stay silent.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::config::TransactionConfig;
use crate::error::{AbortError, ConfigError, ReplicaCommitError};
use crate::transaction::{
    ChannelTransport, CreateRequest, Envelope, LedgerSnapshot, LifecycleEvent, ObjectId,
    PeerId, PeerMessage, RecordingLifecycle, StaticGroup, TransactionCoordinator,
    TransactionEvent, TransactionState,
};

/// How a simulated replica reacts to the creation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaBehavior {
    /// Acknowledges and commits
    Healthy,
    /// Reports a local creation failure
    Failing,
    /// Leaves the group instead of answering
    Departing,
    /// Never answers
    Silent,
}

/// Shape of the simulated group
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Replicas present when the transaction starts
    pub replicas: usize,
    /// How many of them reject the creation
    pub failing: usize,
    /// How many of them leave the group instead of answering
    pub departing: usize,
    /// How many of them never answer
    pub silent: usize,
    /// Healthy peers that join after voting started
    pub late_joiners: usize,
    /// Creation payload
    pub payload: Bytes,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            replicas: 3,
            failing: 0,
            departing: 0,
            silent: 0,
            late_joiners: 0,
            payload: Bytes::from_static(b"replicated-state"),
        }
    }
}

impl SimulationConfig {
    /// Validate the group shape
    pub fn validate(&self) -> Result<(), ConfigError> {
        let misbehaving = self.failing + self.departing + self.silent;
        if misbehaving > self.replicas {
            return Err(ConfigError::ValidationError(format!(
                "{misbehaving} misbehaving replicas requested but only {} replicas",
                self.replicas
            )));
        }
        Ok(())
    }

    /// Behavior of each initial replica, in peer order
    fn behaviors(&self) -> Vec<(PeerId, ReplicaBehavior)> {
        let kinds = std::iter::repeat(ReplicaBehavior::Failing)
            .take(self.failing)
            .chain(std::iter::repeat(ReplicaBehavior::Departing).take(self.departing))
            .chain(std::iter::repeat(ReplicaBehavior::Silent).take(self.silent))
            .chain(std::iter::repeat(ReplicaBehavior::Healthy));

        (1..=self.replicas)
            .zip(kinds)
            .map(|(n, kind)| (PeerId::new(format!("node-{n}")), kind))
            .collect()
    }
}

/// Result of one simulated transaction
#[derive(Debug)]
pub struct SimulationReport {
    /// What `wait_to_commit` returned on the primary
    pub outcome: Result<(), AbortError>,
    /// Primary ledger after the decision
    pub primary: LedgerSnapshot,
    /// Lifecycle callbacks on the primary
    pub lifecycle: Vec<LifecycleEvent>,
    /// Final state of every replica that was created
    pub replicas: BTreeMap<PeerId, TransactionState>,
    /// Wall-clock time until the decision
    pub elapsed: Duration,
}

impl SimulationReport {
    /// Whether the primary committed
    pub fn committed(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Replicas that reached the given state
    pub fn replicas_in(&self, state: TransactionState) -> usize {
        self.replicas.values().filter(|s| **s == state).count()
    }

    /// Turn an aborted outcome into an error
    ///
    /// # Errors
    ///
    /// Returns [`ReplicaCommitError::Abort`] when the primary aborted.
    pub fn ensure_committed(&self) -> Result<(), ReplicaCommitError> {
        match &self.outcome {
            Ok(()) => Ok(()),
            Err(e) => Err(e.clone().into()),
        }
    }
}

/// Run one creation transaction across an in-process group
///
/// # Errors
///
/// Returns [`ReplicaCommitError::Config`] if the group shape or the
/// transaction settings are invalid. An aborted transaction is not an error
/// here; it is reported in [`SimulationReport::outcome`].
pub async fn run(
    config: &SimulationConfig,
    transaction: &TransactionConfig,
) -> Result<SimulationReport, ReplicaCommitError> {
    config.validate()?;
    transaction.validate()?;

    let object_id = ObjectId::from("sim-object");
    let primary_id = PeerId::from("node-0");
    let behaviors = config.behaviors();

    let group = StaticGroup::connected(
        std::iter::once(primary_id.clone()).chain(behaviors.iter().map(|(p, _)| p.clone())),
    );
    let (transport, rx) = ChannelTransport::channel(primary_id.clone());
    let lifecycle = Arc::new(RecordingLifecycle::new());

    let primary = Arc::new(
        TransactionCoordinator::primary(
            object_id,
            primary_id,
            Arc::new(group.clone()),
            Arc::new(transport.clone()),
        )
        .with_config(transaction.clone())
        .with_lifecycle(lifecycle.clone())
        .with_payload(config.payload.clone()),
    );

    info!(
        replicas = config.replicas,
        failing = config.failing,
        departing = config.departing,
        silent = config.silent,
        late_joiners = config.late_joiners,
        "Starting simulation"
    );

    let start = Instant::now();
    primary.on_event(TransactionEvent::Activated).await;

    let mut router = Router {
        primary: Arc::clone(&primary),
        group: group.clone(),
        transport,
        transaction: transaction.clone(),
        behaviors: behaviors.into_iter().collect(),
        replicas: HashMap::new(),
    };

    for n in 1..=config.late_joiners {
        let joiner = PeerId::new(format!("node-late-{n}"));
        router.behaviors.insert(joiner.clone(), ReplicaBehavior::Healthy);
        group.join(joiner.clone());
        primary.on_event(TransactionEvent::MemberJoined(joiner)).await;
    }

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let decide = async {
        let outcome = primary.wait_to_commit().await;
        let _ = shutdown_tx.send(());
        outcome
    };
    let (outcome, replicas) = tokio::join!(decide, router.run(rx, shutdown_rx));

    let report = SimulationReport {
        outcome,
        primary: primary.snapshot(),
        lifecycle: lifecycle.events(),
        replicas,
        elapsed: start.elapsed(),
    };

    info!(
        committed = report.committed(),
        replicas_committed = report.replicas_in(TransactionState::Committed),
        elapsed_ms = report.elapsed.as_millis(),
        "Simulation finished"
    );

    Ok(report)
}

/// Delivers envelopes to the addressed coordinator
struct Router {
    primary: Arc<TransactionCoordinator>,
    group: StaticGroup,
    transport: ChannelTransport,
    transaction: TransactionConfig,
    behaviors: HashMap<PeerId, ReplicaBehavior>,
    replicas: HashMap<PeerId, Arc<TransactionCoordinator>>,
}

impl Router {
    /// Route until shutdown, then drain what is already queued
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Envelope>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> BTreeMap<PeerId, TransactionState> {
        loop {
            tokio::select! {
                envelope = rx.recv() => match envelope {
                    Some(envelope) => self.route(envelope).await,
                    None => break,
                },
                _ = &mut shutdown => break,
            }
        }

        while let Ok(envelope) = rx.try_recv() {
            self.route(envelope).await;
        }

        self.replicas
            .iter()
            .map(|(peer, replica)| (peer.clone(), replica.state()))
            .collect()
    }

    async fn route(&mut self, envelope: Envelope) {
        let Envelope { from, to, message } = envelope;
        debug!(from = %from, to = %to, object = %message.object_id(), "Routing message");

        match message {
            PeerMessage::CreateRequest(request) => self.on_create_request(to, request).await,
            PeerMessage::CreateResponse(response) => {
                if &to == self.primary.local() {
                    self.primary.on_event(response.into()).await;
                }
            }
            PeerMessage::CommitNotice(notice) => {
                if let Some(replica) = self.replicas.get(&to) {
                    replica.on_event(notice.into()).await;
                }
            }
            PeerMessage::AbortNotice(notice) => match self.replicas.get(&to) {
                Some(replica) => replica.on_event(notice.into()).await,
                None => debug!(peer = %to, "Abort notice for a peer without a replica"),
            },
        }
    }

    async fn on_create_request(&mut self, to: PeerId, request: CreateRequest) {
        let behavior = self
            .behaviors
            .get(&to)
            .copied()
            .unwrap_or(ReplicaBehavior::Healthy);

        match behavior {
            ReplicaBehavior::Departing => {
                info!(peer = %to, "Simulated peer leaving the group");
                self.group.leave(&to);
                self.primary
                    .on_event(TransactionEvent::MemberDeparted(to))
                    .await;
            }
            ReplicaBehavior::Silent => {
                debug!(peer = %to, "Simulated peer stays silent");
            }
            ReplicaBehavior::Healthy | ReplicaBehavior::Failing => {
                let replica = Arc::new(
                    TransactionCoordinator::replica(
                        request.object_id,
                        to.clone(),
                        request.sender,
                        Arc::new(self.transport.for_peer(to.clone())),
                    )
                    .with_config(self.transaction.clone())
                    .with_payload(request.payload),
                );
                self.replicas.insert(to, Arc::clone(&replica));

                if behavior == ReplicaBehavior::Failing {
                    replica.reject_as_replica("simulated creation failure").await;
                } else {
                    replica.on_event(TransactionEvent::Activated).await;
                }
            }
        }
    }
}
