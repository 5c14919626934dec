//! Storage engine for DriftDB
//!
//! This crate implements the node-local storage structure:
//!
//! - **SkipList**: a concurrent ordered map with a single serialized
//!   writer and lock-free readers
//! - **MemoryEngine**: key → sorted list of versioned sibling values
//!
//! The engine trait is deliberately small — get, put, scan — so that
//! tests and the in-process loopback path can swap implementations.

pub mod memory;
pub mod skiplist;

use driftdb_core::{Key, Result, VersionedValue};

pub use memory::MemoryEngine;
pub use skiplist::SkipList;

/// Capability set offered by a storage engine
pub trait Engine: Send + Sync {
    /// Returns every surviving sibling for the key
    ///
    /// An absent key yields [`driftdb_core::Error::KeyNotFound`]; a key
    /// holding only tombstones yields those tombstones, so callers can
    /// tell deletion apart from absence.
    fn get(&self, key: &str) -> Result<Vec<VersionedValue>>;

    /// Stores a versioned value under the key
    ///
    /// Placement follows the value's version vector: siblings strictly
    /// before it are dropped, an equal sibling deduplicates the write,
    /// concurrent siblings are retained. A value strictly before an
    /// existing sibling is rejected as an idempotent no-op.
    fn put(&self, key: &str, value: VersionedValue) -> Result<()>;

    /// Lazy iteration over all entries in key order
    fn scan(&self) -> Box<dyn EngineIterator>;
}

/// Iterator returned by [`Engine::scan`]
pub trait EngineIterator {
    /// Advances to the next entry
    ///
    /// Returns [`driftdb_core::Error::NoMoreItems`] once exhausted.
    fn next(&mut self) -> Result<(Key, Vec<VersionedValue>)>;
}
