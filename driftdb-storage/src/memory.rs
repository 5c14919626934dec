//! In-memory storage engine
//!
//! Maps string keys to lists of versioned sibling values, backed by the
//! skip list ordered lexicographically. Sibling placement is governed by
//! version vectors: a write that causally dominates existing siblings
//! replaces them, a concurrent write coexists with them, and an obsolete
//! write is rejected as an idempotent no-op.

use parking_lot::Mutex;
use std::cmp::Ordering;

use driftdb_core::vclock::Causality;
use driftdb_core::{Error, Key, Result, VersionedValue};

use crate::skiplist::{Iter, SkipList};
use crate::{Engine, EngineIterator};

fn compare_keys(a: &Key, b: &Key) -> Ordering {
    a.cmp(b)
}

/// Storage engine keeping all data in memory
///
/// Reads go straight to the skip list without locking. Writes serialize
/// on an engine-level mutex because sibling placement is a
/// read-modify-write of the whole entry.
pub struct MemoryEngine {
    entries: SkipList<Key, Vec<VersionedValue>>,
    write_lock: Mutex<()>,
}

impl MemoryEngine {
    /// Creates an empty engine
    pub fn new() -> Self {
        Self {
            entries: SkipList::new(compare_keys),
            write_lock: Mutex::new(()),
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MemoryEngine {
    fn get(&self, key: &str) -> Result<Vec<VersionedValue>> {
        self.entries
            .get(&key.to_string())
            .ok_or(Error::KeyNotFound)
    }

    fn put(&self, key: &str, value: VersionedValue) -> Result<()> {
        let _write = self.write_lock.lock();

        let key = key.to_string();
        let siblings = self.entries.get(&key).unwrap_or_default();

        let mut kept = Vec::with_capacity(siblings.len() + 1);

        for existing in siblings {
            match value.version.compare(&existing.version) {
                // Obsolete or duplicate write; the stored entry already
                // covers it.
                Causality::Before | Causality::Equal => return Ok(()),
                Causality::After => continue,
                Causality::Concurrent => kept.push(existing),
            }
        }

        kept.push(value);
        self.entries.insert(key, kept);

        Ok(())
    }

    fn scan(&self) -> Box<dyn EngineIterator> {
        Box::new(MemoryIterator {
            it: self.entries.scan(),
        })
    }
}

/// Iterator over the engine's entries in key order
pub struct MemoryIterator {
    it: Iter<Key, Vec<VersionedValue>>,
}

impl EngineIterator for MemoryIterator {
    fn next(&mut self) -> Result<(Key, Vec<VersionedValue>)> {
        self.it.next().ok_or(Error::NoMoreItems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftdb_core::vclock::Version;

    fn value(data: &str, version: &str) -> VersionedValue {
        VersionedValue::new(data.as_bytes().to_vec(), Version::decode(version).unwrap())
    }

    #[test]
    fn test_get_missing_key() {
        let engine = MemoryEngine::new();
        assert!(matches!(engine.get("nope"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn test_put_then_get() {
        let engine = MemoryEngine::new();

        engine.put("k", value("hello", "1:1")).unwrap();

        let siblings = engine.get("k").unwrap();
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].data, b"hello");
    }

    #[test]
    fn test_dominating_write_replaces_siblings() {
        let engine = MemoryEngine::new();

        engine.put("k", value("v1", "1:1")).unwrap();
        engine.put("k", value("v2", "1:2")).unwrap();

        let siblings = engine.get("k").unwrap();
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].data, b"v2");
    }

    #[test]
    fn test_concurrent_writes_become_siblings() {
        let engine = MemoryEngine::new();

        engine.put("k", value("a", "1:1")).unwrap();
        engine.put("k", value("b", "2:1")).unwrap();

        let siblings = engine.get("k").unwrap();
        assert_eq!(siblings.len(), 2);

        // A write dominating both collapses the entry again.
        engine.put("k", value("c", "1:2;2:1")).unwrap();
        let siblings = engine.get("k").unwrap();
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].data, b"c");
    }

    #[test]
    fn test_obsolete_write_is_noop() {
        let engine = MemoryEngine::new();

        engine.put("k", value("new", "1:2")).unwrap();
        engine.put("k", value("old", "1:1")).unwrap();

        let siblings = engine.get("k").unwrap();
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].data, b"new");
    }

    #[test]
    fn test_equal_version_is_deduplicated() {
        let engine = MemoryEngine::new();

        engine.put("k", value("a", "1:1")).unwrap();
        engine.put("k", value("a", "1:1")).unwrap();

        assert_eq!(engine.get("k").unwrap().len(), 1);
    }

    #[test]
    fn test_no_sibling_pair_is_ordered_after_puts() {
        let engine = MemoryEngine::new();

        for version in ["1:1", "2:1", "1:2", "3:1", "1:2;2:1"] {
            engine.put("k", value(version, version)).unwrap();
        }

        let siblings = engine.get("k").unwrap();
        for (i, a) in siblings.iter().enumerate() {
            for b in siblings.iter().skip(i + 1) {
                assert_eq!(a.version.compare(&b.version), Causality::Concurrent);
            }
        }
    }

    #[test]
    fn test_tombstone_is_returned() {
        let engine = MemoryEngine::new();

        engine
            .put("k", VersionedValue::tombstone(Version::decode("1:2").unwrap()))
            .unwrap();

        let siblings = engine.get("k").unwrap();
        assert_eq!(siblings.len(), 1);
        assert!(siblings[0].tombstone);
    }

    #[test]
    fn test_scan_in_key_order() {
        let engine = MemoryEngine::new();

        for key in ["b", "a", "c"] {
            engine.put(key, value(key, "1:1")).unwrap();
        }

        let mut it = engine.scan();
        let mut keys = Vec::new();
        loop {
            match it.next() {
                Ok((key, _)) => keys.push(key),
                Err(Error::NoMoreItems) => break,
                Err(err) => panic!("unexpected error: {}", err),
            }
        }

        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
