//! Cluster membership for DriftDB
//!
//! A SWIM-style protocol maintains a shared view of cluster nodes:
//!
//! - **Node directory**: the process-local table of known nodes and
//!   their status, hashed so peers can cheaply detect divergence
//! - **Failure detector**: periodic direct probes, confirmed through
//!   indirect probes relayed by intermediary nodes
//! - **Anti-entropy**: full-state exchange with a deterministic,
//!   order-independent merge
//!
//! The cluster also owns the per-node connection cache used by both the
//! detector and the replication coordinator.

pub mod config;
pub mod detector;
pub mod node;
pub mod swim;

pub use config::ClusterConfig;
pub use node::{from_infos, to_infos, Node};
pub use swim::SwimCluster;
