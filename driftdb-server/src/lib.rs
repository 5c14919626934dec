//! DriftDB node server
//!
//! Wires the storage engine, the SWIM cluster, the node RPC service,
//! the replication coordinator, and the REST facade into one process.

pub mod api;
pub mod conv;
pub mod opts;
pub mod service;
pub mod setup;

pub use opts::Opts;
pub use service::{LocalClient, NodeService};
