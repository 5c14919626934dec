//! Read reconciliation
//!
//! Given the values a set of replicas returned for one key, decide which
//! siblings survive, which replicas are stale, and which version vector
//! the client must present on its next write to dominate what it has
//! just seen.

use std::collections::HashSet;

use driftdb_core::vclock::{Causality, Version};
use driftdb_core::{NodeId, Result};
use driftdb_net::VersionedValueMsg;

/// A value as returned by one replica
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaValue {
    pub node_id: NodeId,
    pub value: VersionedValueMsg,
}

/// Outcome of reconciling one key across replicas
#[derive(Debug)]
pub struct MergeResult {
    /// Encoded merge of every version seen; stamping the next write with
    /// it keeps the lineage causally continuous
    pub version: String,
    /// Surviving siblings, deduplicated by version
    pub values: Vec<ReplicaValue>,
    /// Replicas that returned a value strictly dominated by another;
    /// targets of read repair
    pub stale_replicas: Vec<NodeId>,
}

/// Reconciles the values returned by replicas for the same key
///
/// Every value that is strictly before some other value is dropped and
/// its replica recorded as stale; mutually concurrent values all
/// survive. The pairwise check is quadratic, but the input is bounded by
/// the replication factor.
///
/// # Errors
///
/// Fails with [`driftdb_core::Error::InvalidVersion`] if any value
/// carries an undecodable version.
pub fn merge_versions(values: Vec<ReplicaValue>) -> Result<MergeResult> {
    let mut versions = Vec::with_capacity(values.len());
    for value in &values {
        versions.push(Version::decode(&value.value.version)?);
    }

    let mut merged = Version::new();
    for version in &versions {
        merged = merged.merge(version);
    }

    if values.len() < 2 {
        return Ok(MergeResult {
            version: merged.encode(),
            values,
            stale_replicas: Vec::new(),
        });
    }

    // Identify the highest version among all values.
    let mut highest = 0;
    for i in 1..versions.len() {
        if versions[highest].compare(&versions[i]) == Causality::Before {
            highest = i;
        }
    }

    let mut stale_replicas = Vec::new();
    let mut seen = HashSet::new();
    let mut survivors = Vec::new();

    for (i, value) in values.into_iter().enumerate() {
        // Ignore the values that clearly precede the highest version,
        // keeping track of the replicas that returned them.
        if versions[i].compare(&versions[highest]) == Causality::Before {
            stale_replicas.push(value.node_id);
            continue;
        }

        // Keep unique values only, based on the version.
        if seen.insert(value.value.version.clone()) {
            survivors.push(value);
        }
    }

    Ok(MergeResult {
        version: merged.encode(),
        values: survivors,
        stale_replicas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica_value(node_id: NodeId, data: &str, version: &str) -> ReplicaValue {
        ReplicaValue {
            node_id,
            value: VersionedValueMsg {
                data: data.as_bytes().to_vec(),
                version: version.to_string(),
                tombstone: false,
            },
        }
    }

    #[test]
    fn test_empty_input() {
        let result = merge_versions(Vec::new()).unwrap();
        assert_eq!(result.version, "");
        assert!(result.values.is_empty());
        assert!(result.stale_replicas.is_empty());
    }

    #[test]
    fn test_single_value_passes_through() {
        let result = merge_versions(vec![replica_value(1, "v", "1:2")]).unwrap();
        assert_eq!(result.version, "1:2");
        assert_eq!(result.values.len(), 1);
        assert!(result.stale_replicas.is_empty());
    }

    #[test]
    fn test_stale_replica_is_reported() {
        // R1 and R2 are current, R3 lags one write behind.
        let result = merge_versions(vec![
            replica_value(1, "new", "1:2"),
            replica_value(2, "new", "1:2"),
            replica_value(3, "old", "1:1"),
        ])
        .unwrap();

        assert_eq!(result.version, "1:2");
        assert_eq!(result.values.len(), 1);
        assert_eq!(result.values[0].value.data, b"new");
        assert_eq!(result.stale_replicas, vec![3]);
    }

    #[test]
    fn test_concurrent_siblings_all_survive() {
        let result = merge_versions(vec![
            replica_value(1, "a", "1:1"),
            replica_value(2, "b", "2:1"),
        ])
        .unwrap();

        assert_eq!(result.version, "1:1;2:1");
        assert_eq!(result.values.len(), 2);
        assert!(result.stale_replicas.is_empty());
    }

    #[test]
    fn test_merged_version_dominates_all_inputs() {
        let result = merge_versions(vec![
            replica_value(1, "a", "1:3;2:1"),
            replica_value(2, "b", "2:4"),
            replica_value(3, "c", "3:2"),
        ])
        .unwrap();

        assert_eq!(result.version, "1:3;2:4;3:2");
    }

    #[test]
    fn test_equal_versions_are_deduplicated() {
        let result = merge_versions(vec![
            replica_value(1, "same", "1:1"),
            replica_value(2, "same", "1:1"),
        ])
        .unwrap();

        assert_eq!(result.values.len(), 1);
        assert!(result.stale_replicas.is_empty());
    }

    #[test]
    fn test_no_surviving_pair_is_ordered() {
        use driftdb_core::vclock::{Causality, Version};

        let result = merge_versions(vec![
            replica_value(1, "a", "1:2"),
            replica_value(2, "b", "2:1"),
            replica_value(3, "c", "1:1"),
            replica_value(4, "d", "1:2;2:1"),
        ])
        .unwrap();

        for (i, a) in result.values.iter().enumerate() {
            for b in result.values.iter().skip(i + 1) {
                let va = Version::decode(&a.value.version).unwrap();
                let vb = Version::decode(&b.value.version).unwrap();
                assert_eq!(va.compare(&vb), Causality::Concurrent);
            }
        }
        assert!(result.stale_replicas.contains(&3));
    }

    #[test]
    fn test_invalid_version_fails_the_merge() {
        let result = merge_versions(vec![
            replica_value(1, "a", "1:1"),
            replica_value(2, "b", "not-a-version"),
        ]);

        assert!(result.is_err());
    }
}
