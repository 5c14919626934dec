//! Core types used throughout DriftDB
//!
//! This module contains the fundamental data types that form the basis
//! of DriftDB's data model: node identity, node status, and versioned
//! values as stored by the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::vclock::Version;

/// A key in the store
pub type Key = String;

/// Identifies a cluster member, unique per cluster and stable across restarts
pub type NodeId = u32;

/// Distinguishes restarts of the same [`NodeId`]
///
/// Chosen at process start, typically the wall-clock time in seconds.
pub type RunId = i64;

/// Per-node generation counter, monotonically increasing within one run
pub type Generation = u64;

/// Liveness status of a cluster member
///
/// `Left` is terminal for a given run: a node that announced departure can
/// only come back with a fresh [`RunId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// The node responds to probes
    Healthy,
    /// The node failed its last confirmed probe
    Unhealthy,
    /// The node announced departure from the cluster
    Left,
}

impl Status {
    /// Tie-break rank used when two gossip entries carry the same
    /// generation: `Left > Unhealthy > Healthy`, so that status can only
    /// be downgraded without a newer generation.
    pub fn rank(self) -> u8 {
        match self {
            Status::Healthy => 0,
            Status::Unhealthy => 1,
            Status::Left => 2,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Healthy => write!(f, "healthy"),
            Status::Unhealthy => write!(f, "unhealthy"),
            Status::Left => write!(f, "left"),
        }
    }
}

/// A value together with the version vector that produced it
///
/// This is the engine-level representation: the vector is kept decoded.
/// On the wire the vector travels in its canonical string encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    /// The payload; meaningless when `tombstone` is set
    pub data: Vec<u8>,
    /// The causal history of this value
    pub version: Version,
    /// Marks a delete at `version`
    pub tombstone: bool,
}

impl VersionedValue {
    /// Creates a regular value
    pub fn new(data: Vec<u8>, version: Version) -> Self {
        Self {
            data,
            version,
            tombstone: false,
        }
    }

    /// Creates a tombstone at the given version
    pub fn tombstone(version: Version) -> Self {
        Self {
            data: Vec::new(),
            version,
            tombstone: true,
        }
    }
}
