//! # Error Types
//!
//! Error handling for the Chronicle leader lifecycle subsystem.

use crate::{HistoryId, LogPosition};
use thiserror::Error;

/// Error conditions arising in the leader subsystem.
///
/// Most of these are expected operational noise: transient peer failures and
/// protocol refusals are absorbed by the timer-driven re-election loop and
/// never retried in place. The exceptions are the fatal variants — a violated
/// consensus invariant or an unexpected Agent system state — which terminate
/// the node so the supervisor can restart it from scratch.
///
/// # Examples
///
/// ```rust
/// use chronicle_core::ChronicleError;
///
/// let error = ChronicleError::transport("connection refused");
/// assert!(!error.is_fatal());
/// ```
#[derive(Error, Debug)]
pub enum ChronicleError {
    /// The metadata Agent failed an operation
    #[error("agent error: {message}")]
    Agent { message: String },

    /// Peer communication failure
    #[error("transport error: {message}")]
    Transport { message: String },

    /// No established leader is currently known
    #[error("no leader")]
    NoLeader,

    /// This node is not in the voter set of the current configuration
    #[error("not a voter in the current configuration")]
    NotVoter,

    /// An election ended without gathering a quorum
    #[error("no quorum: {granted} vote(s) granted")]
    NoQuorum { granted: usize },

    /// A message or request referenced a different history
    #[error("history mismatch: ours {ours}, theirs {theirs}")]
    HistoryMismatch { ours: HistoryId, theirs: HistoryId },

    /// A vote was requested from a position behind our own
    #[error("candidate position {theirs} is behind ours {ours}")]
    PositionBehind {
        ours: LogPosition,
        theirs: LogPosition,
    },

    /// The Agent reported a system state this subsystem cannot run in
    #[error("unexpected system state: {details}")]
    UnexpectedSystemState { details: String },

    /// A consensus invariant was violated locally
    #[error("invariant violation: {details}")]
    InvariantViolation { details: String },

    /// Operation exceeded its time limit
    #[error("timeout: {operation}")]
    Timeout { operation: String },

    /// Unexpected internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Results in the Chronicle leader subsystem.
pub type Result<T> = std::result::Result<T, ChronicleError>;

impl ChronicleError {
    /// Creates a new agent error with the given message.
    pub fn agent(message: impl Into<String>) -> Self {
        Self::Agent {
            message: message.into(),
        }
    }

    /// Creates a new transport error with the given message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a new invariant-violation error with the given details.
    pub fn invariant(details: impl Into<String>) -> Self {
        Self::InvariantViolation {
            details: details.into(),
        }
    }

    /// Creates a new timeout error naming the operation that expired.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates a new internal error with the given message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error must terminate the node.
    ///
    /// Fatal errors mean local state can no longer be trusted; the process
    /// exits and the supervisor restarts the subsystem from scratch.
    /// Everything else is handled by the normal timer-driven retry loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvariantViolation { .. } | Self::UnexpectedSystemState { .. }
        )
    }
}

impl From<anyhow::Error> for ChronicleError {
    fn from(err: anyhow::Error) -> Self {
        ChronicleError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality_classification() {
        assert!(ChronicleError::invariant("two established leaders").is_fatal());
        assert!(ChronicleError::UnexpectedSystemState {
            details: "not provisioned".into()
        }
        .is_fatal());

        assert!(!ChronicleError::transport("peer down").is_fatal());
        assert!(!ChronicleError::NoQuorum { granted: 1 }.is_fatal());
        assert!(!ChronicleError::NoLeader.is_fatal());
    }
}
