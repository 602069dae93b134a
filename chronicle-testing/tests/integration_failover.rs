//! Failover integration tests: leader death, term teardown, and history
//! changes all end with a fresh leader in a later term.

use chronicle_core::{ClusterEvent, HistoryId, MetadataEvent, PeerId};
use chronicle_leader::Incarnation;
use chronicle_testing::TestCluster;
use std::time::Duration;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

/// Killing the leader makes the survivors elect a new one in a higher term,
/// without waiting for the follower timeout.
#[tokio::test]
async fn survivors_elect_a_new_leader_after_leader_dies() {
    init_logging();
    let cluster = TestCluster::provisioned(3, TestCluster::fast_config());
    let (old_leader, (_, old_term)) = cluster
        .converged_leader(Duration::from_secs(10))
        .await
        .expect("cluster should converge");

    cluster.hub.kill(old_leader);

    let survivors: Vec<PeerId> = cluster
        .nodes
        .iter()
        .map(|n| n.peer)
        .filter(|p| *p != old_leader)
        .collect();

    // Wait out the changeover on one survivor, then require agreement.
    let surviving_node = cluster.node_by_peer(survivors[0]).unwrap();
    surviving_node
        .handle
        .wait_for_leader(Incarnation::Term(old_term), Duration::from_secs(10))
        .await
        .expect("survivors should fail over");

    let (new_leader, (history_id, new_term)) = cluster
        .converged_leader_among(&survivors, Duration::from_secs(10))
        .await
        .expect("survivors should agree");

    assert_ne!(new_leader, old_leader);
    assert!(survivors.contains(&new_leader));
    assert!(new_term.number > old_term.number);
    assert_eq!(history_id, cluster.history_id);

    cluster.shutdown().await;
}

/// When the proposer gives up on the term, the leader steps down and the
/// cluster re-elects in a later term.
#[tokio::test]
async fn finished_term_forces_a_new_election() {
    init_logging();
    let cluster = TestCluster::provisioned(3, TestCluster::fast_config());
    let (old_leader, (history_id, old_term)) = cluster
        .converged_leader(Duration::from_secs(10))
        .await
        .expect("cluster should converge");

    let leader_node = cluster.node_by_peer(old_leader).unwrap();
    leader_node.handle.note_term_finished(history_id, old_term);

    let (_, (_, new_term)) = leader_node
        .handle
        .wait_for_leader(Incarnation::Term(old_term), Duration::from_secs(10))
        .await
        .expect("a successor term should be established");
    assert!(new_term.number > old_term.number);

    cluster.shutdown().await;
}

/// A history change invalidates all leader state: everyone drops to
/// observer and the next leader is established in the new history.
#[tokio::test]
async fn new_history_resets_leadership() {
    init_logging();
    let cluster = TestCluster::provisioned(3, TestCluster::fast_config());
    let (_, (old_history, old_term)) = cluster
        .converged_leader(Duration::from_secs(10))
        .await
        .expect("cluster should converge");
    assert_eq!(old_history, cluster.history_id);

    let new_history = HistoryId::new();
    for node in &cluster.nodes {
        node.agent.update_metadata(|meta| {
            meta.history_id = new_history;
        });
        let meta = node.agent.metadata();
        node.bus.publish(ClusterEvent::Metadata(MetadataEvent::NewHistory {
            history_id: new_history,
            meta,
        }));
    }

    let (new_leader, (history_id, new_term)) = cluster
        .node(0)
        .handle
        .wait_for_leader(Incarnation::Term(old_term), Duration::from_secs(10))
        .await
        .expect("a leader should emerge in the new history");

    assert_eq!(history_id, new_history);
    assert!(cluster.nodes.iter().any(|n| n.peer == new_leader));
    assert!(new_term.number > 0);

    cluster.shutdown().await;
}
