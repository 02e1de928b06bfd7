//! Peer identifiers and group membership
//!
//! Peer and object identifiers are cheap shared handles. The group itself is
//! owned by the hosting container; the coordinator only ever sees it through
//! [`GroupContext::view`].

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Identifier of a peer in the group
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(Arc<str>);

impl PeerId {
    /// Create a peer identifier
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Borrow the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the replicated object being created
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Arc<str>);

impl ObjectId {
    /// Create an object identifier
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Borrow the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of the local container's group membership
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupView {
    /// The local container is not connected to any group
    Disconnected,
    /// Connected, with the current member list (may include the local peer)
    Connected { members: Vec<PeerId> },
}

impl GroupView {
    /// Build a connected view from anything yielding peer ids
    pub fn connected<I, P>(members: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PeerId>,
    {
        Self::Connected {
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the local container is connected
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Source of the current group membership
///
/// Implementations are provided by the hosting container. They MUST NOT call
/// back into the coordinator; `view` may be invoked while the coordinator is
/// handling an event.
pub trait GroupContext: Send + Sync {
    /// Current membership of the group
    fn view(&self) -> GroupView;
}

/// In-memory group membership with join/leave
///
/// Useful for single-process groups and tests. Cloning shares the same
/// underlying membership.
#[derive(Debug, Clone, Default)]
pub struct StaticGroup {
    inner: Arc<RwLock<StaticGroupInner>>,
}

#[derive(Debug, Default)]
struct StaticGroupInner {
    connected: bool,
    members: Vec<PeerId>,
}

impl StaticGroup {
    /// Create a connected group with the given members
    pub fn connected<I, P>(members: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PeerId>,
    {
        Self {
            inner: Arc::new(RwLock::new(StaticGroupInner {
                connected: true,
                members: members.into_iter().map(Into::into).collect(),
            })),
        }
    }

    /// Create a group view that reports the local container as disconnected
    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Add a member. Returns `false` if it was already present.
    pub fn join(&self, peer: impl Into<PeerId>) -> bool {
        let peer = peer.into();
        let mut inner = self.inner.write();
        if inner.members.contains(&peer) {
            return false;
        }
        inner.members.push(peer);
        true
    }

    /// Remove a member. Returns `false` if it was not present.
    pub fn leave(&self, peer: &PeerId) -> bool {
        let mut inner = self.inner.write();
        let before = inner.members.len();
        inner.members.retain(|p| p != peer);
        inner.members.len() != before
    }

    /// Mark the local container connected or disconnected
    pub fn set_connected(&self, connected: bool) {
        self.inner.write().connected = connected;
    }

    /// Number of members
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().members.len()
    }

    /// Whether the group has no members
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().members.is_empty()
    }
}

impl GroupContext for StaticGroup {
    fn view(&self) -> GroupView {
        let inner = self.inner.read();
        if inner.connected {
            GroupView::Connected {
                members: inner.members.clone(),
            }
        } else {
            GroupView::Disconnected
        }
    }
}
