//! Leader publication and waiters.
//!
//! The FSM is the single writer of a process-wide leader snapshot; any
//! client may read it without coordination. Only `Established` leaders are
//! visible through the public lookup; tentative leaders stay internal.
//! Blocked clients ride the snapshot's change notifications, so a publish
//! always happens before any waiter is woken.

use chronicle_core::{
    ChronicleError, ClusterEvent, EventBus, HistoryId, LeaderChange, LeaderInfo, LeaderStatus,
    PeerId, Result, Term,
};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// What a waiting client already knows about the leader.
///
/// `wait_for_leader` returns as soon as a visible leader exists whose term
/// differs from the supplied incarnation, so a client holding a stale leader
/// can wait specifically for its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incarnation {
    /// Any visible leader will do.
    Any,
    /// Wait for a leader in a term other than this one.
    Term(Term),
}

/// Process-wide leader snapshot with change notification.
pub struct LeaderStatusBoard {
    snapshot: watch::Sender<Option<LeaderInfo>>,
    bus: EventBus,
}

impl LeaderStatusBoard {
    pub fn new(bus: EventBus) -> Self {
        let (snapshot, _) = watch::channel(None);
        Self { snapshot, bus }
    }

    /// The current leader, if one is established.
    ///
    /// Tentative leaders are never returned: until the proposer confirms a
    /// quorum commit in the term, clients see no leader at all.
    pub fn get_leader(&self) -> Option<(PeerId, (HistoryId, Term))> {
        visible(*self.snapshot.borrow())
    }

    /// Waits until a leader distinct from `incarnation` is visible.
    ///
    /// Returns [`ChronicleError::NoLeader`] if `wait` elapses first.
    pub async fn wait_for_leader(
        &self,
        incarnation: Incarnation,
        wait: Duration,
    ) -> Result<(PeerId, (HistoryId, Term))> {
        let mut rx = self.snapshot.subscribe();
        let found = tokio::time::timeout(wait, async move {
            loop {
                let hit = visible(*rx.borrow_and_update())
                    .filter(|(_, (_, term))| incarnation != Incarnation::Term(*term));
                if let Some(hit) = hit {
                    return Ok(hit);
                }
                if rx.changed().await.is_err() {
                    return Err(ChronicleError::NoLeader);
                }
            }
        })
        .await;
        found.unwrap_or(Err(ChronicleError::NoLeader))
    }

    /// Replaces the snapshot. No-op when nothing changed; otherwise waiters
    /// are woken and a [`LeaderChange`] goes out on the bus.
    pub(crate) fn publish(&self, info: Option<LeaderInfo>) {
        let previous = *self.snapshot.borrow();
        if previous == info {
            return;
        }
        debug!(?previous, current = ?info, "leader info updated");
        self.snapshot.send_replace(info);
        self.bus.publish(ClusterEvent::LeaderChanged(LeaderChange {
            previous,
            current: info,
        }));
    }

    /// Re-announces the current snapshot unconditionally.
    pub(crate) fn announce(&self) {
        let current = *self.snapshot.borrow();
        self.snapshot.send_replace(current);
        self.bus.publish(ClusterEvent::LeaderChanged(LeaderChange {
            previous: current,
            current,
        }));
    }
}

fn visible(info: Option<LeaderInfo>) -> Option<(PeerId, (HistoryId, Term))> {
    info.filter(|info| info.status == LeaderStatus::Established)
        .map(|info| (info.leader, (info.history_id, info.term)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(status: LeaderStatus) -> LeaderInfo {
        let leader = PeerId::from(1);
        LeaderInfo {
            leader,
            history_id: HistoryId::from(7),
            term: Term::genesis().next(leader),
            status,
        }
    }

    #[tokio::test]
    async fn tentative_leaders_are_invisible() {
        let board = LeaderStatusBoard::new(EventBus::default());
        board.publish(Some(info(LeaderStatus::Tentative)));
        assert_eq!(board.get_leader(), None);

        board.publish(Some(info(LeaderStatus::Established)));
        let (leader, (_, term)) = board.get_leader().unwrap();
        assert_eq!(leader, PeerId::from(1));
        assert_eq!(term.number, 1);
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_visible() {
        let board = LeaderStatusBoard::new(EventBus::default());
        board.publish(Some(info(LeaderStatus::Established)));

        let got = board
            .wait_for_leader(Incarnation::Any, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(got.0, PeerId::from(1));
    }

    #[tokio::test]
    async fn wait_times_out_without_a_leader() {
        let board = LeaderStatusBoard::new(EventBus::default());
        let err = board
            .wait_for_leader(Incarnation::Any, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ChronicleError::NoLeader));
    }

    #[tokio::test]
    async fn wait_skips_the_known_incarnation() {
        let board = LeaderStatusBoard::new(EventBus::default());
        let current = info(LeaderStatus::Established);
        board.publish(Some(current));

        // A client that already knows this leader keeps waiting past it.
        let known = Incarnation::Term(current.term);
        let err = board
            .wait_for_leader(known, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ChronicleError::NoLeader));

        // A successor term wakes it.
        let board = LeaderStatusBoard::new(EventBus::default());
        board.publish(Some(current));
        let next = LeaderInfo {
            term: current.term.next(current.leader),
            ..current
        };
        let waiter = board.wait_for_leader(known, Duration::from_secs(1));
        board.publish(Some(next));
        let got = waiter.await.unwrap();
        assert_eq!(got.1 .1, next.term);
    }

    #[tokio::test]
    async fn publish_emits_change_events_only_on_change() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let board = LeaderStatusBoard::new(bus);

        let established = info(LeaderStatus::Established);
        board.publish(Some(established));
        board.publish(Some(established));
        board.publish(None);

        assert!(matches!(
            rx.recv().await.unwrap(),
            ClusterEvent::LeaderChanged(LeaderChange {
                previous: None,
                current: Some(_),
            })
        ));
        // The duplicate publish was suppressed; next event is the clear.
        assert!(matches!(
            rx.recv().await.unwrap(),
            ClusterEvent::LeaderChanged(LeaderChange {
                previous: Some(_),
                current: None,
            })
        ));
    }
}
