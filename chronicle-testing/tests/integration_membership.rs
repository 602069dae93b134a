//! Membership self-check integration test: a node that is silently dropped
//! from the cluster configuration finds out on its own and marks itself
//! removed.

use chronicle_core::{ClusterEvent, MetadataEvent, Quorum};
use chronicle_testing::TestCluster;
use std::time::Duration;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

#[tokio::test]
async fn silently_removed_node_marks_itself_removed() {
    init_logging();
    // Peer 3 is a non-voting member; peers 1 and 2 elect among themselves.
    let cluster = TestCluster::provisioned_with_voters(3, &[1, 2], TestCluster::fast_config());
    let removed_peer = cluster.node(2).peer;

    let voters = vec![cluster.node(0).peer, cluster.node(1).peer];
    let (leader, _) = cluster
        .converged_leader_among(&voters, Duration::from_secs(10))
        .await
        .expect("voters should elect a leader");
    assert!(voters.contains(&leader));

    // Drop peer 3 from everyone else's configuration. Nobody tells peer 3:
    // it stops receiving heartbeats and has to find out by asking.
    for node in &cluster.nodes {
        if node.peer == removed_peer {
            continue;
        }
        node.agent.update_metadata(|meta| {
            meta.config.members.remove(&removed_peer);
            meta.config.voters.remove(&removed_peer);
            meta.config.quorum = Quorum::Majority(meta.config.voters.clone());
        });
        let meta = node.agent.metadata();
        node.bus.publish(ClusterEvent::Metadata(MetadataEvent::NewConfig {
            config: meta.config.clone(),
            meta,
        }));
    }

    // The membership check runs once the node has been idle long enough,
    // samples a peer, hears "not a member", and persists the removal.
    let victim = cluster.node(2);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !victim.agent.removal_recorded() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "removal was never recorded"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    // A removed node never claims leadership.
    assert_ne!(
        victim.handle.get_leader().map(|(peer, _)| peer),
        Some(removed_peer)
    );

    cluster.shutdown().await;
}
