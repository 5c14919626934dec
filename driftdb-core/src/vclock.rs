//! Version vectors
//!
//! A [`Version`] records, for each node, how many writes that node has
//! authored to the lineage in question. Comparing two vectors yields a
//! partial order: last-write-wins applies within a lineage, while truly
//! concurrent writes surface as sibling values that the merge resolver
//! preserves until a dominating write reconciles them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::NodeId;

/// The causal relation between two version vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Causality {
    /// Every counter of the left vector is <= the right one, at least one is strictly less
    Before,
    /// Neither vector dominates the other
    Concurrent,
    /// Every counter of the left vector is >= the right one, at least one is strictly greater
    After,
    /// The vectors are identical
    Equal,
}

impl fmt::Display for Causality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Causality::Before => write!(f, "Before"),
            Causality::Concurrent => write!(f, "Concurrent"),
            Causality::After => write!(f, "After"),
            Causality::Equal => write!(f, "Equal"),
        }
    }
}

/// A version vector mapping node IDs to write counters
///
/// Absent entries are read as zero, and zero-valued entries are never
/// stored, so two equal vectors always hold identical maps. The canonical
/// string encoding lists `id:counter` pairs in ascending id order joined
/// by `;` (e.g. `1:2;4:1`); the empty vector encodes to the empty string.
/// Equal vectors therefore encode to byte-identical strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Version {
    counters: BTreeMap<NodeId, u64>,
}

impl Version {
    /// Returns a new, empty version vector
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter for the given node, zero if absent
    pub fn get(&self, id: NodeId) -> u64 {
        self.counters.get(&id).copied().unwrap_or(0)
    }

    /// True if no node has authored a write yet
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Advances the counter for the given node by one
    ///
    /// # Panics
    ///
    /// Panics on counter overflow. Wrapping would silently reorder the
    /// lineage, which is data corruption; halting is the only safe policy.
    pub fn increment(&mut self, id: NodeId) {
        let counter = self.counters.entry(id).or_insert(0);
        *counter = counter
            .checked_add(1)
            .unwrap_or_else(|| panic!("version counter overflow for node {}", id));
    }

    /// Element-wise maximum over the union of both vectors
    pub fn merge(&self, other: &Version) -> Version {
        let mut merged = self.counters.clone();

        for (id, counter) in &other.counters {
            let entry = merged.entry(*id).or_insert(0);
            if *counter > *entry {
                *entry = *counter;
            }
        }

        Version { counters: merged }
    }

    /// Determines the causal relation between two vectors
    pub fn compare(&self, other: &Version) -> Causality {
        let mut greater = false;
        let mut less = false;

        for (id, a) in &self.counters {
            let b = other.get(*id);
            if *a > b {
                greater = true;
            } else if *a < b {
                less = true;
            }
        }

        for (id, b) in &other.counters {
            if self.get(*id) < *b {
                less = true;
            }
        }

        match (greater, less) {
            (true, false) => Causality::After,
            (false, true) => Causality::Before,
            (false, false) => Causality::Equal,
            (true, true) => Causality::Concurrent,
        }
    }

    /// Encodes the vector into its canonical string form
    pub fn encode(&self) -> String {
        let mut out = String::new();

        for (id, counter) in &self.counters {
            if !out.is_empty() {
                out.push(';');
            }
            out.push_str(&format!("{}:{}", id, counter));
        }

        out
    }

    /// Decodes a vector from its canonical string form
    ///
    /// The empty string decodes to the empty vector. Zero-valued entries
    /// are dropped so that decoding always yields a normalized vector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidVersion`] on any malformed pair.
    pub fn decode(s: &str) -> Result<Version> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Version::new());
        }

        let mut counters = BTreeMap::new();

        for pair in s.split(';') {
            let (id, counter) = pair
                .split_once(':')
                .ok_or_else(|| Error::InvalidVersion(s.to_string()))?;

            let id: NodeId = id
                .parse()
                .map_err(|_| Error::InvalidVersion(s.to_string()))?;
            let counter: u64 = counter
                .parse()
                .map_err(|_| Error::InvalidVersion(s.to_string()))?;

            if counter > 0 {
                counters.insert(id, counter);
            }
        }

        Ok(Version { counters })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn version(pairs: &[(NodeId, u64)]) -> Version {
        let mut v = Version::new();
        for (id, counter) in pairs {
            for _ in 0..*counter {
                v.increment(*id);
            }
        }
        v
    }

    #[test]
    fn test_compare_basic() {
        let a = version(&[(1, 1)]);
        let b = version(&[(1, 2)]);
        assert_eq!(a.compare(&b), Causality::Before);
        assert_eq!(b.compare(&a), Causality::After);

        let c = version(&[(2, 1)]);
        assert_eq!(a.compare(&c), Causality::Concurrent);
        assert_eq!(c.compare(&a), Causality::Concurrent);

        assert_eq!(a.compare(&a.clone()), Causality::Equal);
        assert_eq!(Version::new().compare(&Version::new()), Causality::Equal);
    }

    #[test]
    fn test_compare_absent_keys_as_zero() {
        let a = version(&[(1, 1)]);
        let empty = Version::new();
        assert_eq!(empty.compare(&a), Causality::Before);
        assert_eq!(a.compare(&empty), Causality::After);
    }

    #[test]
    fn test_increment() {
        let mut v = Version::new();
        v.increment(7);
        v.increment(7);
        v.increment(3);
        assert_eq!(v.get(7), 2);
        assert_eq!(v.get(3), 1);
        assert_eq!(v.get(99), 0);
    }

    #[test]
    fn test_merge_takes_maximum() {
        let a = version(&[(1, 3), (2, 1)]);
        let b = version(&[(1, 1), (3, 4)]);
        let m = a.merge(&b);
        assert_eq!(m.get(1), 3);
        assert_eq!(m.get(2), 1);
        assert_eq!(m.get(3), 4);
    }

    #[test]
    fn test_encode_decode() {
        let v = version(&[(1, 2), (4, 1)]);
        assert_eq!(v.encode(), "1:2;4:1");
        assert_eq!(Version::decode("1:2;4:1").unwrap(), v);
        assert_eq!(Version::decode("").unwrap(), Version::new());
        assert_eq!(Version::decode("  ").unwrap(), Version::new());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Version::decode("1").is_err());
        assert!(Version::decode("a:1").is_err());
        assert!(Version::decode("1:x").is_err());
        assert!(Version::decode("1:1;;2:1").is_err());
        assert!(Version::decode("1:1;2:").is_err());
    }

    #[test]
    fn test_decode_drops_zero_counters() {
        let v = Version::decode("1:0;2:3").unwrap();
        assert_eq!(v, version(&[(2, 3)]));
        assert_eq!(v.encode(), "2:3");
    }

    #[test]
    #[should_panic(expected = "version counter overflow")]
    fn test_increment_overflow_panics() {
        let mut v = Version {
            counters: [(1u32, u64::MAX)].into_iter().collect(),
        };
        v.increment(1);
    }

    fn arb_version() -> impl Strategy<Value = Version> {
        proptest::collection::btree_map(0u32..8, 1u64..100, 0..5)
            .prop_map(|counters| Version { counters })
    }

    proptest! {
        #[test]
        fn prop_compare_antisymmetric(a in arb_version(), b in arb_version()) {
            let ab = a.compare(&b);
            let ba = b.compare(&a);
            match ab {
                Causality::Before => prop_assert_eq!(ba, Causality::After),
                Causality::After => prop_assert_eq!(ba, Causality::Before),
                Causality::Equal => prop_assert_eq!(ba, Causality::Equal),
                Causality::Concurrent => prop_assert_eq!(ba, Causality::Concurrent),
            }
        }

        #[test]
        fn prop_merge_commutative(a in arb_version(), b in arb_version()) {
            prop_assert_eq!(a.merge(&b), b.merge(&a));
        }

        #[test]
        fn prop_merge_associative(a in arb_version(), b in arb_version(), c in arb_version()) {
            prop_assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
        }

        #[test]
        fn prop_merge_idempotent(a in arb_version()) {
            prop_assert_eq!(a.merge(&a), a);
        }

        #[test]
        fn prop_merge_dominates_inputs(a in arb_version(), b in arb_version()) {
            let m = a.merge(&b);
            let rel = a.compare(&m);
            prop_assert!(rel == Causality::Before || rel == Causality::Equal);
        }

        #[test]
        fn prop_encode_roundtrip(v in arb_version()) {
            prop_assert_eq!(Version::decode(&v.encode()).unwrap(), v);
        }

        #[test]
        fn prop_equal_vectors_encode_identically(v in arb_version()) {
            let copy = v.clone();
            prop_assert_eq!(v.encode(), copy.encode());
        }
    }
}
