//! Interface to the metadata/log Agent.
//!
//! The Agent persists entries, the current history, the latest term, and the
//! cluster membership, and enforces vote-grant rules. The leader subsystem
//! only consumes it through this trait; the storage engine behind it is a
//! separate concern.

use crate::{ClusterConfig, HistoryId, InstanceId, LogPosition, PeerId, Result, Term};
use async_trait::async_trait;

/// Snapshot of the node's metadata as recorded by the Agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// This node's own peer identity.
    pub peer: PeerId,
    /// This node's current incarnation.
    pub instance_id: InstanceId,
    /// The history the log currently belongs to.
    pub history_id: HistoryId,
    /// The latest established term.
    pub term: Term,
    /// The current cluster configuration.
    pub config: ClusterConfig,
    /// High sequence number of the local log.
    pub high_seqno: u64,
    /// The term of the highest log entry (the term this node last voted in).
    pub high_term: Term,
    /// A history branch that has been proposed but not yet committed.
    pub pending_branch: Option<HistoryId>,
}

impl Metadata {
    /// The node's log position, as compared during vote granting.
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.high_term, self.high_seqno)
    }
}

/// Provisioning state of the local node, as reported by the Agent.
///
/// Any state other than these three is a deployment error the subsystem
/// cannot run in and is treated as fatal.
#[derive(Debug, Clone)]
pub enum SystemState {
    /// The node is a provisioned cluster member.
    Provisioned(Metadata),
    /// The node has been removed from the cluster.
    Removed(Metadata),
    /// The node is in the process of joining a cluster.
    JoiningCluster(Metadata),
    /// The node has no cluster state at all.
    NotProvisioned,
}

/// Operations the leader subsystem consumes from the metadata Agent.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The provisioning state of the local node.
    async fn get_system_state(&self) -> Result<SystemState>;

    /// The current metadata snapshot.
    async fn get_metadata(&self) -> Result<Metadata>;

    /// Whether a vote may be granted to a candidate at `position` in history
    /// `history_id`. The Agent verifies the history matches and that the
    /// candidate's position is at least this node's own.
    async fn check_grant_vote(&self, history_id: HistoryId, position: LogPosition) -> Result<()>;

    /// Whether `peer` at incarnation `instance_id` is still a member of the
    /// cluster in history `history_id`, as far as this Agent knows.
    async fn check_member(
        &self,
        history_id: HistoryId,
        peer: PeerId,
        instance_id: InstanceId,
        peer_seqno: u64,
    ) -> Result<bool>;

    /// Records locally that this node has been removed from the cluster.
    async fn mark_removed(&self, peer: PeerId, instance_id: InstanceId) -> Result<()>;

    /// No-op round trip that flushes queued Agent events before reading state.
    async fn sync(&self) -> Result<()>;
}
