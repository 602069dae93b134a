//! Process-wide event bus.
//!
//! Metadata events flow from the Agent to subscribers in commit order; the
//! leader subsystem consumes them and publishes leader-status changes back
//! onto the same bus. Subscribers filter what they care about.

use crate::{ClusterConfig, HistoryId, LeaderInfo, Metadata, Term};
use tokio::sync::broadcast;

/// Metadata-layer events, delivered in commit order.
#[derive(Debug, Clone)]
pub enum MetadataEvent {
    /// The local node became (or re-became) a provisioned member.
    SystemProvisioned { meta: Metadata },
    /// The local node was removed from the cluster.
    SystemRemoved { meta: Metadata },
    /// The log branched into a new history.
    NewHistory { history_id: HistoryId, meta: Metadata },
    /// A term was confirmed by quorum commit.
    TermEstablished { term: Term },
    /// A new cluster configuration was committed.
    NewConfig { config: ClusterConfig, meta: Metadata },
}

/// A visible change of the published leader snapshot.
///
/// `previous == current` on a forced re-announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderChange {
    pub previous: Option<LeaderInfo>,
    pub current: Option<LeaderInfo>,
}

/// Everything that travels on the process bus.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    Metadata(MetadataEvent),
    LeaderChanged(LeaderChange),
}

/// A cheap-to-clone handle onto the process-wide broadcast bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClusterEvent>,
}

impl EventBus {
    /// Creates a bus able to buffer `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an event. Events published with no subscribers are dropped.
    pub fn publish(&self, event: ClusterEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_publish_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let term = Term::genesis();
        bus.publish(ClusterEvent::Metadata(MetadataEvent::TermEstablished { term }));
        bus.publish(ClusterEvent::LeaderChanged(LeaderChange {
            previous: None,
            current: None,
        }));

        assert!(matches!(
            rx.recv().await.unwrap(),
            ClusterEvent::Metadata(MetadataEvent::TermEstablished { .. })
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ClusterEvent::LeaderChanged(_)
        ));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::new(8);
        bus.publish(ClusterEvent::LeaderChanged(LeaderChange {
            previous: None,
            current: None,
        }));

        // A later subscriber starts from the subscription point.
        let mut rx = bus.subscribe();
        bus.publish(ClusterEvent::Metadata(MetadataEvent::TermEstablished {
            term: Term::genesis(),
        }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ClusterEvent::Metadata(_)
        ));
    }
}
