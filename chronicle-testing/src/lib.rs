//! # Chronicle Testing
//!
//! Testing utilities for the Chronicle leader subsystem: an in-memory
//! metadata agent, an in-memory peer network with liveness simulation, and a
//! multi-node cluster harness with a stub proposer. The workspace
//! integration tests live here, and downstream users can reuse the fakes to
//! exercise the leader subsystem inside their own tests.

pub mod agent;
pub mod cluster;
pub mod network;

pub use agent::InMemoryAgent;
pub use cluster::{ClusterNode, TestCluster};
pub use network::{HubTransport, InMemoryHub};
