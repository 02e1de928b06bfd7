//! Participant selection
//!
//! A [`GroupMembershipFilter`] narrows the current group down to the peers
//! that take part in a creation. Returning `None` means "everyone".

use std::collections::HashSet;

use super::peer::PeerId;

/// Chooses transaction participants from the current group membership
pub trait GroupMembershipFilter: Send + Sync {
    /// Select participants from `members`, or `None` to include every member
    fn filter_participants(&self, members: &[PeerId]) -> Option<Vec<PeerId>>;
}

impl<F> GroupMembershipFilter for F
where
    F: Fn(&[PeerId]) -> Option<Vec<PeerId>> + Send + Sync,
{
    fn filter_participants(&self, members: &[PeerId]) -> Option<Vec<PeerId>> {
        self(members)
    }
}

/// Only members on the allow list participate
#[derive(Debug, Clone, Default)]
pub struct AllowListFilter {
    allowed: HashSet<PeerId>,
}

impl AllowListFilter {
    /// Create a filter admitting the given peers
    pub fn new<I, P>(allowed: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PeerId>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl GroupMembershipFilter for AllowListFilter {
    fn filter_participants(&self, members: &[PeerId]) -> Option<Vec<PeerId>> {
        Some(
            members
                .iter()
                .filter(|m| self.allowed.contains(*m))
                .cloned()
                .collect(),
        )
    }
}
