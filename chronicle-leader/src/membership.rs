//! Membership self-check worker.
//!
//! A node that has been removed from the cluster while partitioned or down
//! never hears about it through the metadata log it no longer receives. The
//! check asks a random sample of peers whether this node is still a member
//! under its current incarnation; a single authoritative "no" is enough to
//! self-heal by marking the local state removed.

use crate::worker::WorkerOutcome;
use chronicle_core::transport::{MembershipQuery, PeerTransport};
use chronicle_core::{Agent, PeerId};
use futures_util::stream::{FuturesUnordered, StreamExt};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{debug, warn};

/// How many peers one check interrogates at most.
const SAMPLE_SIZE: usize = 5;

pub(crate) async fn run_membership_check<A, T>(agent: Arc<A>, transport: Arc<T>) -> WorkerOutcome
where
    A: Agent + ?Sized,
    T: PeerTransport + ?Sized,
{
    let meta = match async {
        agent.sync().await?;
        agent.get_metadata().await
    }
    .await
    {
        Ok(meta) => meta,
        Err(e) => {
            warn!(error = %e, "membership check aborted: metadata snapshot failed");
            return WorkerOutcome::MembershipConfirmed;
        }
    };

    let mut others: Vec<PeerId> = meta
        .config
        .members
        .keys()
        .copied()
        .filter(|p| *p != meta.peer)
        .collect();
    if others.is_empty() {
        return WorkerOutcome::MembershipConfirmed;
    }

    let mut rng = rand::rngs::StdRng::from_entropy();
    others.shuffle(&mut rng);
    others.truncate(SAMPLE_SIZE);

    let query = MembershipQuery {
        history_id: meta.history_id,
        peer: meta.peer,
        instance_id: meta.instance_id,
        high_seqno: meta.high_seqno,
    };
    let mut pending: FuturesUnordered<_> = others
        .into_iter()
        .map(|peer| {
            let transport = Arc::clone(&transport);
            let query = query.clone();
            async move { (peer, transport.query_membership(peer, query).await) }
        })
        .collect();

    while let Some((peer, result)) = pending.next().await {
        match result {
            Ok(false) => {
                warn!(reported_by = %peer, "peer reports us removed from the cluster");
                return WorkerOutcome::MembershipRevoked { reported_by: peer };
            }
            Ok(true) => {}
            Err(e) => {
                debug!(%peer, error = %e, "membership query failed");
            }
        }
    }

    WorkerOutcome::MembershipConfirmed
}
