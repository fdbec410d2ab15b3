//! Ballot numbering.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one competing proposer/leader.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LeaderId(Uuid);

impl LeaderId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for LeaderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LeaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LeaderId({})", self.0)
    }
}

impl fmt::Display for LeaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies one acceptor in the fixed acceptor set.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AcceptorId(Uuid);

impl AcceptorId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for AcceptorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AcceptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AcceptorId({})", self.0)
    }
}

impl fmt::Display for AcceptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A proposer's attempt number for one consensus instance.
///
/// Ordering is lexicographic on `(id, leader)`: higher ballot numbers
/// supersede lower ones, and ties between competing leaders on the same
/// number are broken deterministically by leader id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ballot {
    pub id: i64,
    pub leader: LeaderId,
}

impl Ballot {
    #[must_use]
    pub fn new(id: i64, leader: LeaderId) -> Self {
        Self { id, leader }
    }
}

impl fmt::Debug for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ballot({}@{})", self.id, self.leader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_number_wins() {
        let leader = LeaderId::new();
        assert!(Ballot::new(2, leader) > Ballot::new(1, leader));
        assert!(Ballot::new(1, leader) < Ballot::new(2, leader));
    }

    #[test]
    fn equal_number_breaks_ties_by_leader() {
        let a = LeaderId::from_uuid(Uuid::from_u128(1));
        let b = LeaderId::from_uuid(Uuid::from_u128(2));

        assert!(Ballot::new(5, a) < Ballot::new(5, b));
        // Deterministic: the same comparison never flips.
        assert!(Ballot::new(5, b) > Ballot::new(5, a));
    }

    #[test]
    fn number_dominates_leader() {
        let a = LeaderId::from_uuid(Uuid::from_u128(1));
        let b = LeaderId::from_uuid(Uuid::from_u128(2));

        assert!(Ballot::new(6, a) > Ballot::new(5, b));
    }

    #[test]
    fn identical_ballots_are_equal() {
        let leader = LeaderId::new();
        assert_eq!(Ballot::new(3, leader), Ballot::new(3, leader));
    }
}
