//! Directory entries
//!
//! A [`Node`] is one row of the local membership table. Entries are
//! exchanged between peers as [`NodeInfo`] wire records; the local
//! address is intra-host detail and never gossiped.

use xxhash_rust::xxh3::xxh3_64;

use driftdb_core::{Generation, NodeId, RunId, Status};
use driftdb_net::NodeInfo;

/// One entry of the node directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    /// Human-readable name
    pub name: String,
    /// Address advertised to peers
    pub public_addr: String,
    /// Address used intra-host; empty for remote entries
    pub local_addr: String,
    pub status: Status,
    /// Per-node generation counter; non-decreasing for a given (id, run_id)
    pub gen: Generation,
    /// Identifies one process lifetime of this node
    pub run_id: RunId,
    /// Last probe error recorded for this node, empty if none
    pub error: String,
}

impl Node {
    /// Hashes the gossiped fields of the entry
    ///
    /// Feeds the directory's XOR state hash, so it must be a pure
    /// function of the fields every peer sees: the local address is
    /// excluded, otherwise two identical directories would never hash
    /// equal across hosts.
    pub fn hash64(&self) -> u64 {
        let mut buf = Vec::with_capacity(
            32 + self.name.len() + self.public_addr.len() + self.error.len(),
        );

        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&(self.name.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        buf.extend_from_slice(&(self.public_addr.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.public_addr.as_bytes());
        buf.push(self.status.rank());
        buf.extend_from_slice(&self.gen.to_le_bytes());
        buf.extend_from_slice(&self.run_id.to_le_bytes());
        buf.extend_from_slice(&(self.error.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.error.as_bytes());

        xxh3_64(&buf)
    }
}

/// Converts a directory snapshot into wire records
pub fn to_infos(nodes: &[Node]) -> Vec<NodeInfo> {
    nodes
        .iter()
        .map(|node| NodeInfo {
            id: node.id,
            name: node.name.clone(),
            address: node.public_addr.clone(),
            status: node.status,
            generation: node.gen,
            run_id: node.run_id,
            error: node.error.clone(),
        })
        .collect()
}

/// Converts received wire records into directory entries
pub fn from_infos(infos: Vec<NodeInfo>) -> Vec<Node> {
    infos
        .into_iter()
        .map(|info| Node {
            id: info.id,
            name: info.name,
            public_addr: info.address,
            local_addr: String::new(),
            status: info.status,
            gen: info.generation,
            run_id: info.run_id,
            error: info.error,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node {
            id: 1,
            name: "node-1".to_string(),
            public_addr: "10.0.0.1:3000".to_string(),
            local_addr: "127.0.0.1:3000".to_string(),
            status: Status::Healthy,
            gen: 1,
            run_id: 1700000000,
            error: String::new(),
        }
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(node().hash64(), node().hash64());
    }

    #[test]
    fn test_hash_ignores_local_addr() {
        let mut other = node();
        other.local_addr = String::new();
        assert_eq!(node().hash64(), other.hash64());
    }

    #[test]
    fn test_hash_tracks_gossiped_fields() {
        let base = node().hash64();

        let mut changed = node();
        changed.status = Status::Unhealthy;
        assert_ne!(base, changed.hash64());

        let mut changed = node();
        changed.gen = 2;
        assert_ne!(base, changed.hash64());

        let mut changed = node();
        changed.run_id += 1;
        assert_ne!(base, changed.hash64());
    }

    #[test]
    fn test_info_conversion_roundtrip() {
        let original = node();
        let infos = to_infos(std::slice::from_ref(&original));
        let roundtripped = from_infos(infos).remove(0);

        // Everything except the host-local address survives the trip.
        assert_eq!(roundtripped.id, original.id);
        assert_eq!(roundtripped.name, original.name);
        assert_eq!(roundtripped.public_addr, original.public_addr);
        assert_eq!(roundtripped.status, original.status);
        assert_eq!(roundtripped.gen, original.gen);
        assert_eq!(roundtripped.run_id, original.run_id);
        assert!(roundtripped.local_addr.is_empty());
    }
}
