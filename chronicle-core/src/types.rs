//! # Core Types
//!
//! Fundamental types used throughout the Chronicle leader lifecycle subsystem.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

/// Cluster-unique identifier of a node.
///
/// Every node participating in the cluster is addressed by a `PeerId`. It is
/// opaque to this subsystem: compared for equality, hashed for routing, and
/// otherwise carried around untouched.
///
/// # Examples
///
/// ```rust
/// use chronicle_core::PeerId;
///
/// let peer = PeerId::new();
/// assert_ne!(peer, PeerId::new());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// Creates a new random peer identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u32> for PeerId {
    /// Creates a deterministic `PeerId` from a `u32`, for tests and examples
    /// where predictable peer identities are needed.
    fn from(value: u32) -> Self {
        let b = value.to_be_bytes();
        let bytes = [
            b[0], b[1], b[2], b[3], b[0], b[1], b[2], b[3], b[0], b[1], b[2], b[3], b[0], b[1],
            b[2], b[3],
        ];
        Self(Uuid::from_bytes(bytes))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incarnation identifier of a peer.
///
/// A peer that is wiped and re-added to the cluster keeps its `PeerId` but
/// gets a fresh `InstanceId`. Membership checks compare both, so a stale
/// incarnation of a node cannot masquerade as a current member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    /// Creates a new random instance identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The nil instance, used before a node has learned its own identity.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u32> for InstanceId {
    fn from(value: u32) -> Self {
        Self(PeerId::from(value).0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque epoch label for the cluster's log.
///
/// All terms, leaders, and log positions are scoped to a history. Any history
/// change invalidates prior leader state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryId(pub Uuid);

impl HistoryId {
    /// Creates a new random history identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HistoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u32> for HistoryId {
    fn from(value: u32) -> Self {
        Self(PeerId::from(value).0)
    }
}

impl fmt::Display for HistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Election term: a monotonic number paired with the peer that drove it.
///
/// Term numbers are monotonic within a history. Two terms with the same
/// number but different hints are competing incarnations of the same round,
/// not equals, so `Term` deliberately does not implement `Ord`; compare
/// `number` explicitly where the protocol calls for it.
///
/// # Examples
///
/// ```rust
/// use chronicle_core::{PeerId, Term};
///
/// let me = PeerId::new();
/// let next = Term::genesis().next(me);
/// assert_eq!(next.number, 1);
/// assert_eq!(next.hint, me);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Term {
    /// Monotonic term number within a history.
    pub number: u64,
    /// The peer that created this term.
    pub hint: PeerId,
}

impl Term {
    /// The term every history starts from, before any election.
    pub fn genesis() -> Self {
        Self {
            number: 0,
            hint: PeerId(Uuid::nil()),
        }
    }

    /// The successor term, claimed by `hint`.
    pub fn next(&self, hint: PeerId) -> Self {
        Self {
            number: self.number + 1,
            hint,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.number, self.hint)
    }
}

/// A node's position in the replicated log: the term it last voted in and
/// its high sequence number.
///
/// Positions are totally ordered lexicographically by term number, then by
/// sequence number. Equal term numbers always carry identical term tuples,
/// so the hint never participates in the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    pub term: Term,
    pub high_seqno: u64,
}

impl LogPosition {
    pub fn new(term: Term, high_seqno: u64) -> Self {
        Self { term, high_seqno }
    }
}

impl PartialOrd for LogPosition {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogPosition {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.term.number, self.high_seqno).cmp(&(other.term.number, other.high_seqno))
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.term, self.high_seqno)
    }
}

/// A quorum rule over peer sets.
///
/// `Joint` quorums appear during reconfiguration, when agreement must hold in
/// both the outgoing and the incoming configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quorum {
    /// Strictly more than half of the set must agree.
    Majority(HashSet<PeerId>),
    /// Every member of the set must agree.
    All(HashSet<PeerId>),
    /// Both constituent quorums must hold.
    Joint(Box<Quorum>, Box<Quorum>),
}

impl Quorum {
    /// Whether `votes` satisfies this quorum rule.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use chronicle_core::{PeerId, Quorum};
    /// use std::collections::HashSet;
    ///
    /// let peers: Vec<PeerId> = (1..=3).map(PeerId::from).collect();
    /// let quorum = Quorum::Majority(peers.iter().copied().collect());
    ///
    /// let votes: HashSet<PeerId> = peers[..2].iter().copied().collect();
    /// assert!(quorum.is_met(&votes));
    /// ```
    pub fn is_met(&self, votes: &HashSet<PeerId>) -> bool {
        match self {
            Quorum::Majority(set) => {
                let agreed = set.intersection(votes).count();
                agreed * 2 > set.len()
            }
            Quorum::All(set) => set.is_subset(votes),
            Quorum::Joint(left, right) => left.is_met(votes) && right.is_met(votes),
        }
    }
}

/// Whether a leader has been confirmed by log commit yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeaderStatus {
    /// Elected, but the term is not yet committed. Invisible to clients.
    Tentative,
    /// The proposer confirmed a quorum commit in the term.
    Established,
}

impl fmt::Display for LeaderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaderStatus::Tentative => write!(f, "tentative"),
            LeaderStatus::Established => write!(f, "established"),
        }
    }
}

/// Everything a node knows about the current leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderInfo {
    pub leader: PeerId,
    pub history_id: HistoryId,
    pub term: Term,
    pub status: LeaderStatus,
}

impl fmt::Display for LeaderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} in term {} of history {}",
            self.status, self.leader, self.term, self.history_id
        )
    }
}

/// The current cluster configuration as recorded in the metadata log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Every member of the cluster with its current incarnation.
    pub members: HashMap<PeerId, InstanceId>,
    /// The subset of members that participate in elections.
    pub voters: HashSet<PeerId>,
    /// The quorum rule elections must satisfy.
    pub quorum: Quorum,
}

impl ClusterConfig {
    /// A plain majority configuration where every member votes.
    pub fn majority(members: HashMap<PeerId, InstanceId>) -> Self {
        let voters: HashSet<PeerId> = members.keys().copied().collect();
        let quorum = Quorum::Majority(voters.clone());
        Self {
            members,
            voters,
            quorum,
        }
    }

    /// Whether `peer` at incarnation `instance` may compete in elections:
    /// it must be a configured voter under its current identity.
    pub fn electable(&self, peer: PeerId, instance: InstanceId) -> bool {
        self.voters.contains(&peer) && self.members.get(&peer) == Some(&instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn peers(n: u32) -> Vec<PeerId> {
        (1..=n).map(PeerId::from).collect()
    }

    #[test]
    fn term_next_is_monotonic() {
        let me = PeerId::from(1);
        let t0 = Term::genesis();
        let t1 = t0.next(me);
        let t2 = t1.next(me);
        assert_eq!(t1.number, 1);
        assert_eq!(t2.number, 2);
        assert_eq!(t2.hint, me);
    }

    #[test]
    fn log_position_orders_by_term_then_seqno() {
        let a = PeerId::from(1);
        let low = LogPosition::new(Term::genesis().next(a), 100);
        let high_term = LogPosition::new(Term::genesis().next(a).next(a), 0);
        let high_seqno = LogPosition::new(Term::genesis().next(a), 101);

        assert!(low < high_term);
        assert!(low < high_seqno);
        assert!(high_seqno < high_term);
    }

    #[test]
    fn majority_requires_strictly_more_than_half() {
        let all = peers(4);
        let quorum = Quorum::Majority(all.iter().copied().collect());

        let half: HashSet<PeerId> = all[..2].iter().copied().collect();
        assert!(!quorum.is_met(&half));

        let three: HashSet<PeerId> = all[..3].iter().copied().collect();
        assert!(quorum.is_met(&three));
    }

    #[test]
    fn all_quorum_requires_every_member() {
        let all = peers(3);
        let quorum = Quorum::All(all.iter().copied().collect());

        let most: HashSet<PeerId> = all[..2].iter().copied().collect();
        assert!(!quorum.is_met(&most));

        let everyone: HashSet<PeerId> = all.iter().copied().collect();
        assert!(quorum.is_met(&everyone));
    }

    #[test]
    fn joint_quorum_needs_both_sides() {
        let old = peers(3);
        let new = peers(5);
        let joint = Quorum::Joint(
            Box::new(Quorum::Majority(old.iter().copied().collect())),
            Box::new(Quorum::Majority(new.iter().copied().collect())),
        );

        // Majority of the new set that misses the old majority.
        let votes: HashSet<PeerId> = new[2..].iter().copied().collect();
        assert!(!joint.is_met(&votes));

        let votes: HashSet<PeerId> = new[..3].iter().copied().collect();
        assert!(joint.is_met(&votes));
    }

    #[test]
    fn electability_checks_voter_set_and_incarnation() {
        let peer = PeerId::from(1);
        let instance = InstanceId::from(10);
        let mut members = HashMap::new();
        members.insert(peer, instance);
        members.insert(PeerId::from(2), InstanceId::from(20));
        let config = ClusterConfig::majority(members);

        assert!(config.electable(peer, instance));
        assert!(!config.electable(peer, InstanceId::from(99)));
        assert!(!config.electable(PeerId::from(3), instance));
    }

    proptest! {
        #[test]
        fn majority_is_monotone_in_votes(extra in 0u32..8, size in 1u32..8) {
            let all = peers(size);
            let quorum = Quorum::Majority(all.iter().copied().collect());
            let mut votes: HashSet<PeerId> = HashSet::new();
            let mut was_met = false;
            for (i, peer) in all.iter().enumerate() {
                votes.insert(*peer);
                let met = quorum.is_met(&votes);
                // Once met, adding votes never unmakes the quorum.
                prop_assert!(!was_met || met);
                was_met = met;
                // Strictly-more-than-half boundary.
                prop_assert_eq!(met, (i + 1) * 2 > all.len());
            }
            // Votes outside the set never count.
            let outsider = PeerId::from(size + extra + 1);
            let before = quorum.is_met(&votes);
            votes.insert(outsider);
            prop_assert_eq!(quorum.is_met(&votes), before);
        }

        #[test]
        fn log_position_order_is_total_and_consistent(
            an in 0u64..5, asq in 0u64..100, bn in 0u64..5, bsq in 0u64..100,
        ) {
            let hint = PeerId::from(1);
            let mk = |n: u64, s: u64| LogPosition::new(Term { number: n, hint }, s);
            let a = mk(an, asq);
            let b = mk(bn, bsq);
            prop_assert_eq!(a.cmp(&b), (an, asq).cmp(&(bn, bsq)));
            prop_assert_eq!(a.cmp(&b).reverse(), b.cmp(&a));
            prop_assert_eq!(a == b, a.cmp(&b).is_eq());
        }
    }
}
