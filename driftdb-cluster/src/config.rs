//! Configuration for the membership layer

use std::time::Duration;

use driftdb_core::NodeId;

/// Tunable parameters of the SWIM cluster
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// This node's identity; unique per cluster, stable across restarts
    pub node_id: NodeId,

    /// Human-readable name advertised to peers
    pub node_name: String,

    /// Address other nodes use to reach this one
    pub public_addr: String,

    /// Address used for intra-host connections
    pub local_addr: String,

    /// Deadline for establishing a connection to a peer
    pub dial_timeout: Duration,

    /// Deadline for a single direct probe
    pub probe_timeout: Duration,

    /// Period of the failure-detector tick
    pub probe_interval: Duration,

    /// Upper bound of the random delay added before each probe;
    /// zero disables jitter
    pub probe_jitter: Duration,

    /// Number of intermediary nodes asked to confirm a status change
    pub indirect_nodes: usize,

    /// Period of the Left-node garbage collector; an entry that stayed
    /// `Left` for longer than this is dropped from the directory
    pub gc_interval: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            node_name: String::new(),
            public_addr: String::new(),
            local_addr: String::new(),
            dial_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            probe_interval: Duration::from_secs(1),
            probe_jitter: Duration::ZERO,
            indirect_nodes: 1,
            gc_interval: Duration::from_secs(60),
        }
    }
}
