//! Replicated object creation transactions
//!
//! A peer that creates a replicated object runs a two-phase commit across the
//! other members of its group: it replicates the creation, collects one vote
//! per participant, and then either commits everywhere or tears the object
//! down. Replicas answer once and wait for the commit or abort notice.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                  TransactionCoordinator                   │
//! │  on_event() ──► ParticipantLedger (Mutex) ──► Notify      │
//! │                        │                        │         │
//! │                        ▼                        ▼         │
//! │               PeerTransport sends      wait_to_commit()   │
//! └───────────────────────────────────────────────────────────┘
//!          ▲                    │
//!   GroupContext /              ▼
//!   GroupMembershipFilter   ObjectLifecycle
//! ```
//!
//! # Module Structure
//!
//! - [`coordinator`]: event handling, decision, and the bounded wait
//! - [`ledger`]: participants, failures, and state under one lock
//! - [`replica`]: replica-side acknowledgment
//! - [`transport`]: outbound message boundary and its implementations
//! - [`messages`]: wire messages and container events
//! - [`peer`]: peer and object identifiers, group views
//! - [`filter`]: participant selection
//! - [`lifecycle`]: local object callbacks
//! - [`state`]: transaction phases and roles
//! - [`sequence`]: per-replica response numbering

pub mod coordinator;
pub mod filter;
pub mod ledger;
pub mod lifecycle;
pub mod messages;
pub mod peer;
pub mod replica;
pub mod sequence;
pub mod state;
pub mod transport;

pub use coordinator::TransactionCoordinator;
pub use filter::{AllowListFilter, GroupMembershipFilter};
pub use ledger::{FailureCause, LedgerSnapshot, ParticipantLedger};
pub use lifecycle::{LifecycleEvent, NoOpLifecycle, ObjectLifecycle, RecordingLifecycle};
pub use messages::{
    AbortNotice, CommitNotice, CreateRequest, CreateResponse, PeerMessage, TransactionEvent,
};
pub use peer::{GroupContext, GroupView, ObjectId, PeerId, StaticGroup};
pub use replica::ReplicaResponder;
pub use sequence::SequenceCounter;
pub use state::{Role, TransactionState};
pub use transport::{
    send_within, ChannelTransport, Envelope, MessageKind, MockTransport, NoOpTransport,
    PeerTransport,
};
