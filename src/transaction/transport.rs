//! Peer transport abstraction
//!
//! The coordinator hands every outbound message to a [`PeerTransport`]. The
//! trait is the boundary to the real messaging layer, allowing mock
//! implementations in tests and an in-process channel transport for
//! single-process groups.
//!
//! # Implementations
//!
//! - [`NoOpTransport`]: always succeeds, sends nothing
//! - [`MockTransport`]: records sends, fails on demand, optional delay
//! - [`ChannelTransport`]: routes [`Envelope`]s over a `tokio` mpsc channel

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use super::messages::{AbortNotice, CommitNotice, CreateRequest, CreateResponse, PeerMessage};
use super::peer::PeerId;
use crate::error::SendError;

/// Network transport used by the coordinator and replicas
///
/// Implementations MUST NOT call back into the coordinator from a send.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send a creation request to a participant
    async fn send_create_request(&self, to: &PeerId, request: &CreateRequest)
        -> Result<(), SendError>;

    /// Send a replica's vote to the coordinator
    async fn send_create_response(
        &self,
        to: &PeerId,
        response: &CreateResponse,
    ) -> Result<(), SendError>;

    /// Send a commit notice to a participant
    async fn send_commit_notice(&self, to: &PeerId, notice: &CommitNotice)
        -> Result<(), SendError>;

    /// Tell a participant to destroy its replica
    async fn send_abort_notice(&self, to: &PeerId, notice: &AbortNotice) -> Result<(), SendError>;
}

/// Run one transport send, bounded by `limit`
///
/// A send that does not finish in time surfaces as [`SendError::Timeout`].
pub async fn send_within<F>(peer: &PeerId, limit: Duration, send: F) -> Result<(), SendError>
where
    F: Future<Output = Result<(), SendError>>,
{
    match tokio::time::timeout(limit, send).await {
        Ok(result) => result,
        Err(_) => Err(SendError::timeout(peer.clone(), limit)),
    }
}

/// Transport that accepts every message and delivers none
///
/// Useful for a peer that is alone in its group.
pub struct NoOpTransport;

#[async_trait]
impl PeerTransport for NoOpTransport {
    async fn send_create_request(
        &self,
        _to: &PeerId,
        _request: &CreateRequest,
    ) -> Result<(), SendError> {
        Ok(())
    }

    async fn send_create_response(
        &self,
        _to: &PeerId,
        _response: &CreateResponse,
    ) -> Result<(), SendError> {
        Ok(())
    }

    async fn send_commit_notice(
        &self,
        _to: &PeerId,
        _notice: &CommitNotice,
    ) -> Result<(), SendError> {
        Ok(())
    }

    async fn send_abort_notice(&self, _to: &PeerId, _notice: &AbortNotice) -> Result<(), SendError> {
        Ok(())
    }
}

/// Which kind of message a [`MockTransport`] failure applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    CreateRequest,
    CreateResponse,
    CommitNotice,
    AbortNotice,
}

/// Mock transport for testing failures
///
/// Records every message it accepted and can be configured to reject
/// messages of a given kind to given peers.
#[derive(Default)]
pub struct MockTransport {
    /// Peers that reject messages, by message kind
    failures: Mutex<HashMap<(MessageKind, PeerId), String>>,
    /// Messages accepted so far, in send order
    sent: Mutex<Vec<(PeerId, PeerMessage)>>,
    /// Artificial delay for every send (milliseconds)
    delay_ms: AtomicU64,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sends of `kind` to `peer` fail with `reason`
    pub fn fail(&self, kind: MessageKind, peer: &str, reason: &str) {
        self.failures
            .lock()
            .insert((kind, PeerId::from(peer)), reason.to_string());
    }

    /// Make creation requests to `peer` fail
    pub fn fail_create_request(&self, peer: &str, reason: &str) {
        self.fail(MessageKind::CreateRequest, peer, reason);
    }

    /// Make acknowledgments sent to `peer` fail
    pub fn fail_create_response(&self, peer: &str, reason: &str) {
        self.fail(MessageKind::CreateResponse, peer, reason);
    }

    /// Make commit notices to `peer` fail
    pub fn fail_commit_notice(&self, peer: &str, reason: &str) {
        self.fail(MessageKind::CommitNotice, peer, reason);
    }

    /// Make abort notices to `peer` fail
    pub fn fail_abort_notice(&self, peer: &str, reason: &str) {
        self.fail(MessageKind::AbortNotice, peer, reason);
    }

    /// Set artificial delay for every send
    pub fn set_delay(&self, delay_ms: u64) {
        self.delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    /// All accepted messages, in send order
    pub fn sent(&self) -> Vec<(PeerId, PeerMessage)> {
        self.sent.lock().clone()
    }

    /// Peers that were sent a creation request, in send order
    pub fn create_requests(&self) -> Vec<PeerId> {
        self.recipients(MessageKind::CreateRequest)
    }

    /// Acknowledgments accepted, in send order
    pub fn create_responses(&self) -> Vec<(PeerId, CreateResponse)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(to, msg)| match msg {
                PeerMessage::CreateResponse(r) => Some((to.clone(), r.clone())),
                _ => None,
            })
            .collect()
    }

    /// Peers that were sent a commit notice, in send order
    pub fn commit_notices(&self) -> Vec<PeerId> {
        self.recipients(MessageKind::CommitNotice)
    }

    /// Peers that were sent an abort notice, in send order
    pub fn abort_notices(&self) -> Vec<PeerId> {
        self.recipients(MessageKind::AbortNotice)
    }

    fn recipients(&self, kind: MessageKind) -> Vec<PeerId> {
        self.sent
            .lock()
            .iter()
            .filter(|(_, msg)| kind_of(msg) == kind)
            .map(|(to, _)| to.clone())
            .collect()
    }

    async fn deliver(&self, to: &PeerId, message: PeerMessage) -> Result<(), SendError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let kind = kind_of(&message);
        if let Some(reason) = self.failures.lock().get(&(kind, to.clone())) {
            return Err(SendError::rejected(to.clone(), reason.clone()));
        }

        self.sent.lock().push((to.clone(), message));
        Ok(())
    }
}

fn kind_of(message: &PeerMessage) -> MessageKind {
    match message {
        PeerMessage::CreateRequest(_) => MessageKind::CreateRequest,
        PeerMessage::CreateResponse(_) => MessageKind::CreateResponse,
        PeerMessage::CommitNotice(_) => MessageKind::CommitNotice,
        PeerMessage::AbortNotice(_) => MessageKind::AbortNotice,
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn send_create_request(
        &self,
        to: &PeerId,
        request: &CreateRequest,
    ) -> Result<(), SendError> {
        self.deliver(to, PeerMessage::CreateRequest(request.clone()))
            .await
    }

    async fn send_create_response(
        &self,
        to: &PeerId,
        response: &CreateResponse,
    ) -> Result<(), SendError> {
        self.deliver(to, PeerMessage::CreateResponse(response.clone()))
            .await
    }

    async fn send_commit_notice(
        &self,
        to: &PeerId,
        notice: &CommitNotice,
    ) -> Result<(), SendError> {
        self.deliver(to, PeerMessage::CommitNotice(notice.clone()))
            .await
    }

    async fn send_abort_notice(&self, to: &PeerId, notice: &AbortNotice) -> Result<(), SendError> {
        self.deliver(to, PeerMessage::AbortNotice(notice.clone()))
            .await
    }
}

/// A message in flight between two peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: PeerId,
    pub to: PeerId,
    pub message: PeerMessage,
}

/// Transport that routes messages over an in-process channel
///
/// All peers of a single-process group share one receiver; a router task
/// reads [`Envelope`]s from it and turns them into events for the addressed
/// peer.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    local: PeerId,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ChannelTransport {
    /// Create a transport for `local` and the receiving end of its channel
    pub fn channel(local: PeerId) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { local, tx }, rx)
    }

    /// Transport for another peer sharing the same channel
    #[must_use]
    pub fn for_peer(&self, local: PeerId) -> Self {
        Self {
            local,
            tx: self.tx.clone(),
        }
    }

    /// Peer this transport sends as
    pub fn local(&self) -> &PeerId {
        &self.local
    }

    fn enqueue(&self, to: &PeerId, message: PeerMessage) -> Result<(), SendError> {
        trace!(from = %self.local, to = %to, object = %message.object_id(), "Enqueue peer message");
        self.tx
            .send(Envelope {
                from: self.local.clone(),
                to: to.clone(),
                message,
            })
            .map_err(|_| SendError::ChannelClosed { peer: to.clone() })
    }
}

#[async_trait]
impl PeerTransport for ChannelTransport {
    async fn send_create_request(
        &self,
        to: &PeerId,
        request: &CreateRequest,
    ) -> Result<(), SendError> {
        self.enqueue(to, PeerMessage::CreateRequest(request.clone()))
    }

    async fn send_create_response(
        &self,
        to: &PeerId,
        response: &CreateResponse,
    ) -> Result<(), SendError> {
        self.enqueue(to, PeerMessage::CreateResponse(response.clone()))
    }

    async fn send_commit_notice(
        &self,
        to: &PeerId,
        notice: &CommitNotice,
    ) -> Result<(), SendError> {
        self.enqueue(to, PeerMessage::CommitNotice(notice.clone()))
    }

    async fn send_abort_notice(&self, to: &PeerId, notice: &AbortNotice) -> Result<(), SendError> {
        self.enqueue(to, PeerMessage::AbortNotice(notice.clone()))
    }
}
