//! Election worker.
//!
//! A one-shot task that snapshots the node's metadata, requests votes from
//! the configured voter set, and reports whether a quorum granted them.
//! Winning does not return immediately: a bounded extra wait collects
//! stragglers so the highest term in circulation makes it into the result,
//! and the next term the new leader claims supersedes all of them.

use crate::worker::{ElectionFailure, WorkerOutcome};
use chronicle_core::transport::{PeerTransport, VoteReply, VoteRequest};
use chronicle_core::{Agent, HistoryId, LogPosition, PeerId, Quorum, Result, Term};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The metadata an election runs against, frozen at its start.
#[derive(Debug, Clone)]
pub(crate) struct ElectionSnapshot {
    pub(crate) self_peer: PeerId,
    pub(crate) history_id: HistoryId,
    pub(crate) latest_term: Term,
    pub(crate) position: LogPosition,
    pub(crate) quorum: Quorum,
    pub(crate) voters: HashSet<PeerId>,
}

async fn snapshot_metadata<A: Agent + ?Sized>(agent: &A) -> Result<ElectionSnapshot> {
    agent.sync().await?;
    let meta = agent.get_metadata().await?;
    Ok(ElectionSnapshot {
        self_peer: meta.peer,
        history_id: meta.history_id,
        latest_term: meta.term,
        position: meta.position(),
        quorum: meta.config.quorum.clone(),
        voters: meta.config.voters.clone(),
    })
}

pub(crate) async fn run_election<A, T>(
    agent: Arc<A>,
    transport: Arc<T>,
    extra_wait: Duration,
) -> WorkerOutcome
where
    A: Agent + ?Sized,
    T: PeerTransport + ?Sized,
{
    let snapshot = match snapshot_metadata(agent.as_ref()).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "election aborted: metadata snapshot failed");
            return WorkerOutcome::ElectionLost {
                reason: ElectionFailure::Agent(e.to_string()),
            };
        }
    };
    elect(transport, snapshot, extra_wait).await
}

async fn elect<T>(transport: Arc<T>, snapshot: ElectionSnapshot, extra_wait: Duration) -> WorkerOutcome
where
    T: PeerTransport + ?Sized,
{
    let ElectionSnapshot {
        self_peer,
        history_id,
        latest_term,
        position,
        quorum,
        voters,
    } = snapshot;

    if !voters.contains(&self_peer) {
        return WorkerOutcome::ElectionLost {
            reason: ElectionFailure::NotVoter,
        };
    }

    let others: Vec<PeerId> = voters.iter().copied().filter(|p| *p != self_peer).collect();
    if others.is_empty() {
        // Single-voter configuration: our own vote is the quorum.
        return WorkerOutcome::ElectionWon {
            history_id,
            term: latest_term,
        };
    }

    debug!(
        candidate = %self_peer,
        history = %history_id,
        %position,
        peers = others.len(),
        "requesting votes"
    );

    let request = VoteRequest {
        candidate: self_peer,
        history_id,
        position,
    };
    let mut pending: FuturesUnordered<_> = others
        .into_iter()
        .map(|peer| {
            let transport = Arc::clone(&transport);
            let request = request.clone();
            async move { (peer, transport.request_vote(peer, request).await) }
        })
        .collect();

    let mut granted: HashSet<PeerId> = HashSet::from([self_peer]);
    let mut max_term = latest_term;

    while let Some((peer, result)) = pending.next().await {
        match result {
            Ok(VoteReply::Granted { latest_term }) => {
                granted.insert(peer);
                if latest_term.number > max_term.number {
                    max_term = latest_term;
                }
                if quorum.is_met(&granted) {
                    // Quorum reached; give outstanding replies a bounded
                    // chance to surface a higher term before we claim one.
                    let _ = tokio::time::timeout(extra_wait, async {
                        while let Some((peer, result)) = pending.next().await {
                            if let Ok(VoteReply::Granted { latest_term }) = result {
                                granted.insert(peer);
                                if latest_term.number > max_term.number {
                                    max_term = latest_term;
                                }
                            }
                        }
                    })
                    .await;
                    info!(votes = granted.len(), term = %max_term, "election won");
                    return WorkerOutcome::ElectionWon {
                        history_id,
                        term: max_term,
                    };
                }
            }
            Ok(VoteReply::Rejected { reason }) => {
                info!(%peer, ?reason, "vote withheld");
            }
            Err(e) => {
                debug!(%peer, error = %e, "vote request failed");
            }
        }
    }

    WorkerOutcome::ElectionLost {
        reason: ElectionFailure::NoQuorum {
            granted: granted.len(),
        },
    }
}
