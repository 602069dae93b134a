//! Election integration tests.
//!
//! These drive real leader FSMs over the in-memory network and assert the
//! externally visible contract: who `get_leader` returns, and when.

use chronicle_core::{ChronicleError, ClusterEvent};
use chronicle_leader::Incarnation;
use chronicle_testing::TestCluster;
use std::time::Duration;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

/// A single-node cluster elects itself within one observer timeout and
/// becomes visible once the proposer confirms the term.
#[tokio::test]
async fn solo_node_elects_itself() {
    init_logging();
    let cluster = TestCluster::provisioned(1, TestCluster::fast_config());
    let node = cluster.node(0);

    let (leader, (history_id, term)) = node
        .handle
        .wait_for_leader(Incarnation::Any, Duration::from_secs(5))
        .await
        .expect("solo node should lead");

    assert_eq!(leader, node.peer);
    assert_eq!(history_id, cluster.history_id);
    assert_eq!(term.number, 1);
    assert_eq!(term.hint, node.peer);
    assert_eq!(node.handle.get_leader(), Some((leader, (history_id, term))));

    cluster.shutdown().await;
}

/// Three nodes converge on a single established leader, and every node
/// reports the same one.
#[tokio::test]
async fn three_nodes_agree_on_one_established_leader() {
    init_logging();
    let cluster = TestCluster::provisioned(3, TestCluster::fast_config());

    let (leader, (history_id, term)) = cluster
        .converged_leader(Duration::from_secs(10))
        .await
        .expect("cluster should converge");

    assert!(cluster.nodes.iter().any(|n| n.peer == leader));
    assert_eq!(history_id, cluster.history_id);
    assert!(term.number >= 1);
    assert_eq!(term.hint, leader);

    cluster.shutdown().await;
}

/// With its only peer unreachable, a node in a two-voter cluster can never
/// assemble a majority, and clients time out with `NoLeader`.
#[tokio::test]
async fn no_leader_without_quorum() {
    init_logging();
    let cluster = TestCluster::provisioned(2, TestCluster::fast_config());
    cluster.hub.kill(cluster.node(1).peer);

    let err = cluster
        .node(0)
        .handle
        .wait_for_leader(Incarnation::Any, Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(err, ChronicleError::NoLeader));
    assert_eq!(cluster.node(0).handle.get_leader(), None);

    cluster.shutdown().await;
}

/// `announce_leader_status` re-publishes the unchanged snapshot and `sync`
/// flushes everything queued before it.
#[tokio::test]
async fn announce_and_sync_roundtrip() {
    init_logging();
    let cluster = TestCluster::provisioned(1, TestCluster::fast_config());
    let node = cluster.node(0);

    node.handle
        .wait_for_leader(Incarnation::Any, Duration::from_secs(5))
        .await
        .expect("solo node should lead");

    let mut rx = node.bus.subscribe();
    node.handle.announce_leader_status();
    node.handle.sync().await.expect("sync should flush");

    loop {
        match rx.recv().await.expect("bus should stay open") {
            ClusterEvent::LeaderChanged(change) => {
                assert_eq!(change.previous, change.current);
                assert!(change.current.is_some());
                break;
            }
            _ => continue,
        }
    }

    cluster.shutdown().await;
}
