//! In-memory peer network.
//!
//! Every registered node gets a [`HubTransport`] endpoint and an inbound
//! stream. The hub routes typed messages between live nodes, drops traffic
//! to and from dead ones, and delivers peer up/down events on liveness
//! transitions, so partitions and crashes can be simulated from tests.

use async_trait::async_trait;
use chronicle_core::transport::{
    MembershipQuery, PeerInbound, PeerMessage, PeerTransport, VoteReply, VoteRequest,
};
use chronicle_core::{ChronicleError, PeerId, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// How long a request/reply waits before the peer counts as unresponsive.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

struct Link {
    inbound: mpsc::UnboundedSender<PeerInbound>,
    live: bool,
}

#[derive(Default)]
struct HubInner {
    links: HashMap<PeerId, Link>,
}

/// The shared in-memory network all test nodes hang off.
#[derive(Clone, Default)]
pub struct InMemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl InMemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node and connects it to every live peer.
    pub fn register(&self, peer: PeerId) -> (HubTransport, mpsc::UnboundedReceiver<PeerInbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        for (other, link) in inner.links.iter() {
            if link.live {
                let _ = link.inbound.send(PeerInbound::PeerUp(peer));
                let _ = tx.send(PeerInbound::PeerUp(*other));
            }
        }
        inner.links.insert(
            peer,
            Link {
                inbound: tx,
                live: true,
            },
        );
        (
            HubTransport {
                hub: self.clone(),
                peer,
            },
            rx,
        )
    }

    /// Cuts a node off: its traffic is dropped and everyone else sees it go
    /// down. The node itself keeps running, isolated.
    pub fn kill(&self, peer: PeerId) {
        let mut inner = self.inner.lock();
        if let Some(link) = inner.links.get_mut(&peer) {
            link.live = false;
        }
        for (other, link) in inner.links.iter() {
            if *other != peer && link.live {
                let _ = link.inbound.send(PeerInbound::PeerDown(peer));
            }
        }
    }

    /// Reconnects a previously killed node.
    pub fn revive(&self, peer: PeerId) {
        let mut inner = self.inner.lock();
        if let Some(link) = inner.links.get_mut(&peer) {
            link.live = true;
        }
        let Some(revived) = inner.links.get(&peer).map(|l| l.inbound.clone()) else {
            return;
        };
        for (other, link) in inner.links.iter() {
            if *other != peer && link.live {
                let _ = link.inbound.send(PeerInbound::PeerUp(peer));
                let _ = revived.send(PeerInbound::PeerUp(*other));
            }
        }
    }

    fn route(&self, from: PeerId, to: PeerId, message: PeerInbound) -> Result<()> {
        let inner = self.inner.lock();
        let source_live = inner.links.get(&from).map(|l| l.live).unwrap_or(false);
        let Some(target) = inner.links.get(&to).filter(|l| l.live && source_live) else {
            return Err(ChronicleError::transport(format!("peer {to} unreachable")));
        };
        target
            .inbound
            .send(message)
            .map_err(|_| ChronicleError::transport(format!("peer {to} gone")))
    }
}

/// A node's endpoint onto the hub.
pub struct HubTransport {
    hub: InMemoryHub,
    peer: PeerId,
}

#[async_trait]
impl PeerTransport for HubTransport {
    fn send(&self, target: PeerId, message: PeerMessage) {
        let from = self.peer;
        let inbound = match message {
            PeerMessage::Heartbeat(info) => PeerInbound::Heartbeat { from, info },
            PeerMessage::SteppingDown(info) => PeerInbound::SteppingDown { from, info },
        };
        // Best effort: unreachable peers just miss the message.
        let _ = self.hub.route(from, target, inbound);
    }

    async fn request_vote(&self, target: PeerId, request: VoteRequest) -> Result<VoteReply> {
        let (tx, rx) = oneshot::channel();
        self.hub.route(
            self.peer,
            target,
            PeerInbound::VoteRequest {
                from: self.peer,
                request,
                reply: tx,
            },
        )?;
        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ChronicleError::transport(format!(
                "peer {target} dropped the vote request"
            ))),
            Err(_) => Err(ChronicleError::timeout("request_vote")),
        }
    }

    async fn query_membership(&self, target: PeerId, query: MembershipQuery) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.hub.route(
            self.peer,
            target,
            PeerInbound::MembershipQuery {
                from: self.peer,
                query,
                reply: tx,
            },
        )?;
        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(_)) => Err(ChronicleError::transport(format!(
                "peer {target} dropped the membership query"
            ))),
            Err(_) => Err(ChronicleError::timeout("check_member")),
        }
    }

    fn live_peers(&self) -> HashSet<PeerId> {
        let inner = self.hub.inner.lock();
        inner
            .links
            .iter()
            .filter(|(peer, link)| **peer != self.peer && link.live)
            .map(|(peer, _)| *peer)
            .collect()
    }

    fn connect(&self, _target: PeerId) {
        // Hub links are implicit; registration already connected us.
    }
}
