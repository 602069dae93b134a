//! Peer transport interface.
//!
//! The leader subsystem talks to its peers through two shapes of traffic:
//! fire-and-forget notifications (heartbeats, stepping-down announcements)
//! and correlated request/replies (vote requests, membership queries). The
//! transport must never back-pressure the caller: a send to an unreachable
//! peer is dropped silently.
//!
//! Inbound traffic, including peer liveness transitions, is delivered to the
//! node as [`PeerInbound`] values; request/replies carry a oneshot handle the
//! receiver answers through.

use crate::{HistoryId, InstanceId, LeaderInfo, LogPosition, PeerId, Result, Term};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::oneshot;

/// A request for a vote in an election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub candidate: PeerId,
    pub history_id: HistoryId,
    pub position: LogPosition,
}

/// Why a vote request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteRejection {
    /// The receiver is running its own election.
    InElection,
    /// The receiver is verifying its own membership.
    CheckingMembership,
    /// The receiver already tracks a leader.
    HaveLeader { info: LeaderInfo },
    /// The receiver's Agent refused the grant (history or position).
    NotGranted,
}

/// Reply to a [`VoteRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteReply {
    /// The vote was granted; carries the voter's latest known term.
    Granted { latest_term: Term },
    /// The vote was withheld.
    Rejected { reason: VoteRejection },
}

/// A question to a peer: is the asking node still a cluster member?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipQuery {
    pub history_id: HistoryId,
    pub peer: PeerId,
    pub instance_id: InstanceId,
    pub high_seqno: u64,
}

/// Fire-and-forget notifications sent to peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage {
    Heartbeat(LeaderInfo),
    SteppingDown(LeaderInfo),
}

/// Inbound traffic delivered to a node's leader subsystem.
#[derive(Debug)]
pub enum PeerInbound {
    Heartbeat {
        from: PeerId,
        info: LeaderInfo,
    },
    SteppingDown {
        from: PeerId,
        info: LeaderInfo,
    },
    VoteRequest {
        from: PeerId,
        request: VoteRequest,
        reply: oneshot::Sender<VoteReply>,
    },
    MembershipQuery {
        from: PeerId,
        query: MembershipQuery,
        reply: oneshot::Sender<Result<bool>>,
    },
    /// A remote peer became reachable.
    PeerUp(PeerId),
    /// A remote peer became unreachable.
    PeerDown(PeerId),
}

/// Outbound access to the peer network.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Sends a notification to `target`. Non-blocking and best-effort: if
    /// the peer is unreachable or its queue is full the message is dropped.
    fn send(&self, target: PeerId, message: PeerMessage);

    /// Asks `target` for a vote and awaits its correlated reply.
    async fn request_vote(&self, target: PeerId, request: VoteRequest) -> Result<VoteReply>;

    /// Asks `target` whether the querying node is still a member.
    async fn query_membership(&self, target: PeerId, query: MembershipQuery) -> Result<bool>;

    /// The peers currently reachable, per the liveness subsystem.
    fn live_peers(&self) -> HashSet<PeerId>;

    /// Fire-and-forget connection attempt to a peer not currently live.
    fn connect(&self, target: PeerId);
}
