//! # Chronicle Core
//!
//! Core components and types for the Chronicle leader lifecycle subsystem.
//!
//! Chronicle is a replicated configuration store: a small cluster of nodes
//! agrees on an ordered log of operations and exposes a strongly-consistent
//! key/value view on top of it. This crate provides the building blocks the
//! leader subsystem is written against:
//!
//! ## Key Components
//!
//! - **Types**: peer, instance and history identifiers, terms, log
//!   positions, quorum rules, and leader info
//! - **Agent**: the interface to the metadata/log engine that persists
//!   terms and membership and arbitrates vote grants
//! - **Events**: the process-wide bus carrying metadata events in commit
//!   order and leader-status changes
//! - **Transport**: typed peer messaging with non-blocking sends and
//!   correlated request/replies
//! - **Error Handling**: the error taxonomy, with fatal/non-fatal
//!   classification
//!
//! ## Example Usage
//!
//! ```rust
//! use chronicle_core::{LogPosition, PeerId, Quorum, Term};
//!
//! let me = PeerId::new();
//! let term = Term::genesis().next(me);
//! let position = LogPosition::new(term, 42);
//!
//! let quorum = Quorum::Majority([me].into_iter().collect());
//! assert!(quorum.is_met(&[me].into_iter().collect()));
//! # let _ = position;
//! ```

pub mod agent;
pub mod error;
pub mod events;
pub mod transport;
pub mod types;

// Re-export commonly used types for convenience
pub use agent::{Agent, Metadata, SystemState};
pub use error::*;
pub use events::{ClusterEvent, EventBus, LeaderChange, MetadataEvent};
pub use types::*;
