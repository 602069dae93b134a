//! Worker task plumbing.
//!
//! The FSM runs at most one helper task at a time: an election or a
//! membership check. Workers never touch FSM state; they deliver a single
//! [`WorkerOutcome`] into the FSM mailbox, tagged with the generation that
//! spawned them so a result that outlives its state entry is discarded.

use chronicle_core::{HistoryId, PeerId, Term};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Why an election came up empty-handed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum ElectionFailure {
    /// This node is not in the voter set of the current configuration.
    #[error("not a voter")]
    NotVoter,
    /// Replies were exhausted without reaching a quorum.
    #[error("no quorum ({granted} vote(s) granted)")]
    NoQuorum { granted: usize },
    /// The metadata snapshot could not be taken.
    #[error("agent failure: {0}")]
    Agent(String),
    /// The worker task panicked.
    #[error("worker crashed")]
    WorkerCrashed,
}

/// Final result of a worker task.
#[derive(Debug)]
pub(crate) enum WorkerOutcome {
    /// A quorum granted votes; `term` is the highest term seen anywhere.
    ElectionWon { history_id: HistoryId, term: Term },
    ElectionLost {
        reason: ElectionFailure,
    },
    /// No peer disputed our membership.
    MembershipConfirmed,
    /// A peer reported that we are no longer a member.
    MembershipRevoked {
        reported_by: PeerId,
    },
}

/// Handle to the currently-running worker, if any.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    pub(crate) handle: JoinHandle<()>,
    pub(crate) generation: u64,
}

impl WorkerHandle {
    /// Force-terminates the worker. Any result it had already queued is
    /// filtered out by generation.
    pub(crate) fn kill(self) {
        self.handle.abort();
    }
}
