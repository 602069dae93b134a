//! Multi-node cluster harness.
//!
//! Wires N leader FSMs together over the in-memory hub, each with its own
//! agent and event bus, plus a stub proposer per node. The stub models just
//! enough of the proposer contract for leadership to become visible: it
//! confirms a tentative self-leadership by committing the term — at most one
//! commit per term number and history across the whole cluster — replicates
//! the established term into every agent, and tells losers to finish their
//! term.

use crate::{InMemoryAgent, InMemoryHub};
use chronicle_core::{
    ChronicleError, ClusterConfig, ClusterEvent, EventBus, HistoryId, InstanceId, LeaderStatus,
    Metadata, MetadataEvent, PeerId, Quorum, Result, Term,
};
use chronicle_leader::{LeaderConfig, LeaderFsm, LeaderHandle};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// One running node of a test cluster.
pub struct ClusterNode {
    pub peer: PeerId,
    pub handle: LeaderHandle,
    pub agent: Arc<InMemoryAgent>,
    pub bus: EventBus,
    fsm_task: JoinHandle<Result<()>>,
    proposer_task: JoinHandle<()>,
}

/// A provisioned cluster of leader FSMs over an in-memory network.
pub struct TestCluster {
    pub hub: InMemoryHub,
    pub history_id: HistoryId,
    pub nodes: Vec<ClusterNode>,
}

impl TestCluster {
    /// Timing tuned so whole scenarios finish in well under a second.
    pub fn fast_config() -> LeaderConfig {
        LeaderConfig::new()
            .with_heartbeat_interval(Duration::from_millis(20))
            .with_check_member_after(Duration::from_millis(150))
            .with_check_member_timeout(Duration::from_secs(2))
    }

    /// A cluster of `count` nodes, all of them voters.
    pub fn provisioned(count: u32, config: LeaderConfig) -> Self {
        let all: Vec<u32> = (1..=count).collect();
        Self::provisioned_with_voters(count, &all, config)
    }

    /// A cluster of `count` nodes where only the listed peer numbers vote.
    pub fn provisioned_with_voters(count: u32, voters: &[u32], config: LeaderConfig) -> Self {
        let peers: Vec<PeerId> = (1..=count).map(PeerId::from).collect();
        let members: HashMap<PeerId, InstanceId> =
            peers.iter().map(|p| (*p, InstanceId(p.0))).collect();
        let voter_set: HashSet<PeerId> = voters.iter().map(|n| PeerId::from(*n)).collect();
        let cluster_config = ClusterConfig {
            members,
            voters: voter_set.clone(),
            quorum: Quorum::Majority(voter_set),
        };
        let history_id = HistoryId::new();
        let hub = InMemoryHub::new();
        let commits: Arc<Mutex<HashMap<HistoryId, u64>>> = Arc::new(Mutex::new(HashMap::new()));

        // Build every node before starting any, so term replication always
        // sees the whole cluster.
        let mut built = Vec::new();
        for &peer in &peers {
            let meta = Metadata {
                peer,
                instance_id: InstanceId(peer.0),
                history_id,
                term: Term::genesis(),
                config: cluster_config.clone(),
                high_seqno: 0,
                high_term: Term::genesis(),
                pending_branch: None,
            };
            let agent = Arc::new(InMemoryAgent::provisioned(meta));
            let bus = EventBus::new(256);
            let (transport, inbound) = hub.register(peer);
            let (fsm, handle) = LeaderFsm::new(
                peer,
                config.clone(),
                Arc::clone(&agent),
                Arc::new(transport),
                bus.clone(),
                inbound,
            );
            built.push((peer, agent, bus, fsm, handle));
        }

        let replicas: Arc<Vec<(Arc<InMemoryAgent>, EventBus)>> = Arc::new(
            built
                .iter()
                .map(|(_, agent, bus, _, _)| (Arc::clone(agent), bus.clone()))
                .collect(),
        );

        let nodes = built
            .into_iter()
            .map(|(peer, agent, bus, fsm, handle)| {
                let proposer_task = tokio::spawn(stub_proposer(
                    peer,
                    bus.subscribe(),
                    handle.clone(),
                    Arc::clone(&commits),
                    Arc::clone(&replicas),
                ));
                let fsm_task = tokio::spawn(fsm.run());
                ClusterNode {
                    peer,
                    handle,
                    agent,
                    bus,
                    fsm_task,
                    proposer_task,
                }
            })
            .collect();

        Self {
            hub,
            history_id,
            nodes,
        }
    }

    pub fn node(&self, index: usize) -> &ClusterNode {
        &self.nodes[index]
    }

    pub fn node_by_peer(&self, peer: PeerId) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.peer == peer)
    }

    /// Polls until every listed node reports the same established leader.
    pub async fn converged_leader_among(
        &self,
        peers: &[PeerId],
        wait: Duration,
    ) -> Result<(PeerId, (HistoryId, Term))> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let views: Vec<_> = self
                .nodes
                .iter()
                .filter(|n| peers.contains(&n.peer))
                .map(|n| n.handle.get_leader())
                .collect();
            if let Some(Some(first)) = views.first() {
                if views.iter().all(|v| v.as_ref() == Some(first)) {
                    return Ok(*first);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ChronicleError::NoLeader);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Polls until every node reports the same established leader.
    pub async fn converged_leader(&self, wait: Duration) -> Result<(PeerId, (HistoryId, Term))> {
        let peers: Vec<PeerId> = self.nodes.iter().map(|n| n.peer).collect();
        self.converged_leader_among(&peers, wait).await
    }

    /// Stops every node, leaders stepping down first.
    pub async fn shutdown(self) {
        for node in &self.nodes {
            node.handle.shutdown();
        }
        for node in self.nodes {
            let _ = tokio::time::timeout(Duration::from_secs(5), node.fsm_task).await;
            node.proposer_task.abort();
        }
    }
}

async fn stub_proposer(
    peer: PeerId,
    mut rx: broadcast::Receiver<ClusterEvent>,
    handle: LeaderHandle,
    commits: Arc<Mutex<HashMap<HistoryId, u64>>>,
    replicas: Arc<Vec<(Arc<InMemoryAgent>, EventBus)>>,
) {
    loop {
        match rx.recv().await {
            Ok(ClusterEvent::LeaderChanged(change)) => {
                let Some(info) = change.current else { continue };
                if info.leader != peer || info.status != LeaderStatus::Tentative {
                    continue;
                }
                let established = {
                    let mut commits = commits.lock();
                    let committed = commits.entry(info.history_id).or_insert(0);
                    if info.term.number > *committed {
                        *committed = info.term.number;
                        // The term record commits and replicates into every
                        // node's metadata.
                        for (agent, bus) in replicas.iter() {
                            agent.update_metadata(|meta| {
                                meta.term = info.term;
                                meta.high_term = info.term;
                                meta.high_seqno += 1;
                            });
                            bus.publish(ClusterEvent::Metadata(MetadataEvent::TermEstablished {
                                term: info.term,
                            }));
                        }
                        true
                    } else {
                        false
                    }
                };
                if established {
                    handle.note_term_established(info.history_id, info.term);
                } else {
                    handle.note_term_finished(info.history_id, info.term);
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
