//! Replication layer for DriftDB
//!
//! The [`Coordinator`] fans client operations out across the replica
//! set and reconciles divergent replica states on the way back using
//! version vectors ([`merge`]).

pub mod coordinator;
pub mod merge;

pub use coordinator::{Coordinator, GetResult, PutResult, ReplicationConfig};
pub use merge::{merge_versions, MergeResult, ReplicaValue};
