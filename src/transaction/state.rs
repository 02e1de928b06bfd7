//! Transaction phases and peer roles

use std::fmt;

/// Phase of a creation transaction
///
/// `Active` is the entry state of the primary and `Prepared` the resting
/// state of a replica that acknowledged. `Committed` and `Aborted` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Created, not yet activated
    Active,
    /// Primary is collecting votes from participants
    Voting,
    /// Replica acknowledged and awaits the commit notice
    Prepared,
    /// Creation succeeded
    Committed,
    /// Creation rolled back
    Aborted,
}

impl TransactionState {
    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Voting => write!(f, "voting"),
            Self::Prepared => write!(f, "prepared"),
            Self::Committed => write!(f, "committed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Role of the local peer in a creation transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiates the creation and decides its outcome
    Primary,
    /// Acknowledges a creation initiated elsewhere
    Replica,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Replica => write!(f, "replica"),
        }
    }
}
