//! Messages exchanged with peers and events consumed by the coordinator
//!
//! # Wire messages
//!
//! | Message          | Direction            | Purpose                              |
//! |------------------|----------------------|--------------------------------------|
//! | `CreateRequest`  | primary → replica    | replicate the object to a participant |
//! | `CreateResponse` | replica → primary    | vote: created, or failed with cause  |
//! | `CommitNotice`   | primary → replica    | creation committed                   |
//! | `AbortNotice`    | primary → replica    | creation aborted, destroy the replica |
//!
//! Messages are transport-agnostic; [`PeerMessage`] is the serializable
//! envelope payload a transport carries.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::peer::{ObjectId, PeerId};

/// Request for a participant to create its replica of the object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Peer that coordinates the creation
    pub sender: PeerId,
    /// Object being created
    pub object_id: ObjectId,
    /// Opaque creation payload handed to the remote instantiator
    pub payload: Bytes,
}

/// A participant's vote on the creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResponse {
    /// Peer that attempted the local creation
    pub from: PeerId,
    /// Object the response refers to
    pub object_id: ObjectId,
    /// Sequence number assigned by the responding replica
    pub sequence: i64,
    /// Failure cause, `None` when the replica was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_cause: Option<String>,
}

impl CreateResponse {
    /// Successful vote
    pub fn success(from: PeerId, object_id: ObjectId, sequence: i64) -> Self {
        Self {
            from,
            object_id,
            sequence,
            failure_cause: None,
        }
    }

    /// Failed vote with the given cause
    pub fn failure(
        from: PeerId,
        object_id: ObjectId,
        sequence: i64,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            from,
            object_id,
            sequence,
            failure_cause: Some(cause.into()),
        }
    }

    /// Whether the vote reports success
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure_cause.is_none()
    }
}

/// Instruction to finalize creation of the object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitNotice {
    /// Object being committed
    pub object_id: ObjectId,
}

/// Instruction to destroy a replica of an aborted creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortNotice {
    /// Object being rolled back
    pub object_id: ObjectId,
}

/// Any message a peer can send to another peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    CreateRequest(CreateRequest),
    CreateResponse(CreateResponse),
    CommitNotice(CommitNotice),
    AbortNotice(AbortNotice),
}

impl PeerMessage {
    /// Object the message refers to
    #[must_use]
    pub fn object_id(&self) -> &ObjectId {
        match self {
            Self::CreateRequest(m) => &m.object_id,
            Self::CreateResponse(m) => &m.object_id,
            Self::CommitNotice(m) => &m.object_id,
            Self::AbortNotice(m) => &m.object_id,
        }
    }
}

/// Event delivered to a coordinator by the hosting container
///
/// Delivery order is preserved per peer; no order is assumed across peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionEvent {
    /// The local object was activated
    Activated,
    /// A peer joined the group
    MemberJoined(PeerId),
    /// A participant voted
    CreateResponse(CreateResponse),
    /// A peer left the group
    MemberDeparted(PeerId),
    /// The coordinator committed the creation
    CommitReceived(CommitNotice),
    /// The coordinator aborted the creation
    AbortReceived(AbortNotice),
}

impl TransactionEvent {
    /// Short name used in log fields
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Activated => "activated",
            Self::MemberJoined(_) => "member_joined",
            Self::CreateResponse(_) => "create_response",
            Self::MemberDeparted(_) => "member_departed",
            Self::CommitReceived(_) => "commit_received",
            Self::AbortReceived(_) => "abort_received",
        }
    }
}

impl From<CreateResponse> for TransactionEvent {
    fn from(response: CreateResponse) -> Self {
        Self::CreateResponse(response)
    }
}

impl From<CommitNotice> for TransactionEvent {
    fn from(notice: CommitNotice) -> Self {
        Self::CommitReceived(notice)
    }
}

impl From<AbortNotice> for TransactionEvent {
    fn from(notice: AbortNotice) -> Self {
        Self::AbortReceived(notice)
    }
}
