//! Lock-cooperative skip list
//!
//! This module implements a concurrent ordered map that supports:
//! - A single writer at a time, serialized by a mutex
//! - Arbitrarily many concurrent readers that never block the writer
//! - Atomically replaceable value slots
//! - Lazy forward iteration
//!
//! Every forward pointer is read and written atomically, so a reader may
//! traverse the list while the writer splices or unlinks nodes. A reader
//! can observe an insertion that is only partially visible on the upper
//! levels, but the level-0 ordering it sees is always consistent: the
//! level-0 pointer store is the linearization point of an insert.
//!
//! # Memory Management
//!
//! Uses crossbeam's epoch-based memory reclamation to free unlinked nodes
//! and replaced values once no reader can still hold a reference to them.

use crossbeam::epoch::{self, Atomic, Guard, Owned, Shared};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering as AtomicOrdering};

/// Maximum height of the skip list
const MAX_HEIGHT: usize = 12;

/// Probability factor for determining node height (1/4 chance of increasing height)
const BRANCHING_FACTOR: u32 = 4;

/// Compares two keys, defining the iteration order of the list
pub type Comparator<K> = fn(&K, &K) -> Ordering;

/// A node in the skip list
///
/// The key is `None` only for the head sentinel. The value lives in an
/// atomically swappable slot so the writer can replace it in place while
/// readers load it without locking.
struct Node<K, V> {
    key: Option<K>,
    value: Atomic<V>,
    next: [Atomic<Node<K, V>>; MAX_HEIGHT],
}

impl<K, V> Node<K, V> {
    fn new(key: Option<K>) -> Self {
        Self {
            key,
            value: Atomic::null(),
            next: std::array::from_fn(|_| Atomic::null()),
        }
    }

    fn key(&self) -> &K {
        self.key.as_ref().expect("head sentinel has no key")
    }

    fn load_value(&self, guard: &Guard) -> Option<V>
    where
        V: Clone,
    {
        let value = self.value.load(AtomicOrdering::Acquire, guard);
        unsafe { value.as_ref() }.cloned()
    }
}

impl<K, V> Drop for Node<K, V> {
    fn drop(&mut self) {
        let value = std::mem::replace(&mut self.value, Atomic::null());
        unsafe {
            let guard = epoch::unprotected();
            if !value.load(AtomicOrdering::Relaxed, guard).is_null() {
                drop(value.into_owned());
            }
        }
    }
}

/// A concurrent ordered map with probabilistic balancing
///
/// Heights follow a geometric distribution with branching factor 4: a new
/// node has height 1 with probability 3/4, height 2 with probability 3/16,
/// and so on up to [`MAX_HEIGHT`].
///
/// # Thread Safety
///
/// Multiple threads can read concurrently without locking; writes are
/// serialized by an internal mutex. Readers never block the writer and the
/// writer never blocks readers.
pub struct SkipList<K, V> {
    head: Atomic<Node<K, V>>,
    compare: Comparator<K>,
    write_lock: Mutex<()>,
    height: AtomicUsize,
    size: AtomicIsize,
    rng: Mutex<StdRng>,
}

impl<K, V> SkipList<K, V>
where
    K: Clone,
    V: Clone,
{
    /// Creates a new empty skip list ordered by the given comparator
    pub fn new(compare: Comparator<K>) -> Self {
        Self {
            head: Atomic::new(Node::new(None)),
            compare,
            write_lock: Mutex::new(()),
            height: AtomicUsize::new(0),
            size: AtomicIsize::new(0),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Returns the current height of the list
    pub fn height(&self) -> usize {
        self.height.load(AtomicOrdering::Acquire)
    }

    /// Returns the number of keys in the list
    pub fn size(&self) -> usize {
        self.size.load(AtomicOrdering::Relaxed).max(0) as usize
    }

    fn random_height(&self) -> usize {
        let mut height = 1;
        let mut rng = self.rng.lock();

        while height < MAX_HEIGHT && rng.gen_ratio(1, BRANCHING_FACTOR) {
            height += 1;
        }

        height
    }

    /// Descends the list to the last node whose key is strictly less than
    /// `key`, filling `search_path` with the predecessor at every level
    /// down to `stop_at`
    ///
    /// Returns the null pointer when the list is empty; the returned node
    /// may be the head sentinel.
    fn find_less<'g>(
        &self,
        key: &K,
        mut search_path: Option<&mut [Shared<'g, Node<K, V>>; MAX_HEIGHT]>,
        stop_at: usize,
        guard: &'g Guard,
    ) -> Shared<'g, Node<K, V>> {
        let height = self.height.load(AtomicOrdering::Acquire);
        if height == 0 {
            return Shared::null();
        }

        let mut level = height - 1;
        let mut node = self.head.load(AtomicOrdering::Acquire, guard);

        loop {
            let next = unsafe { node.as_ref() }.unwrap().next[level].load(AtomicOrdering::Acquire, guard);

            if let Some(next_ref) = unsafe { next.as_ref() } {
                if (self.compare)(key, next_ref.key()) == Ordering::Greater {
                    node = next;
                    continue;
                }
            }

            if let Some(path) = search_path.as_deref_mut() {
                path[level] = node;
            }

            if level == stop_at {
                break;
            }

            level -= 1;
        }

        node
    }

    /// Inserts a key-value pair
    ///
    /// If the key already exists, the value slot is replaced atomically
    /// and no new node is allocated. Otherwise a node of random height is
    /// spliced in, publishing its forward pointers from level 0 upward so
    /// readers see the key as soon as the bottom level is linked.
    pub fn insert(&self, key: K, value: V) {
        let _write = self.write_lock.lock();
        let guard = epoch::pin();

        let mut search_path: [Shared<'_, Node<K, V>>; MAX_HEIGHT] = [Shared::null(); MAX_HEIGHT];
        self.find_less(&key, Some(&mut search_path), 0, &guard);

        if let Some(prev) = unsafe { search_path[0].as_ref() } {
            let found = prev.next[0].load(AtomicOrdering::Acquire, &guard);
            if let Some(found_ref) = unsafe { found.as_ref() } {
                if (self.compare)(&key, found_ref.key()) == Ordering::Equal {
                    let old = found_ref
                        .value
                        .swap(Owned::new(value), AtomicOrdering::AcqRel, &guard);
                    if !old.is_null() {
                        unsafe { guard.defer_destroy(old) };
                    }
                    return;
                }
            }
        }

        let new_height = self.random_height();
        let node = Node::new(Some(key));
        node.value.store(Owned::new(value), AtomicOrdering::Relaxed);
        let node = Owned::new(node).into_shared(&guard);

        let height = self.height.load(AtomicOrdering::Acquire);
        if new_height > height {
            let head = self.head.load(AtomicOrdering::Acquire, &guard);
            for level in height..new_height {
                search_path[level] = head;
            }
            self.height.store(new_height, AtomicOrdering::Release);
        }

        let node_ref = unsafe { node.as_ref() }.unwrap();
        for level in 0..new_height {
            let next =
                unsafe { search_path[level].as_ref() }.unwrap().next[level].load(AtomicOrdering::Acquire, &guard);
            node_ref.next[level].store(next, AtomicOrdering::Relaxed);
        }

        for level in 0..new_height {
            unsafe { search_path[level].as_ref() }.unwrap().next[level]
                .store(node, AtomicOrdering::Release);
        }

        self.size.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Removes a key, returning whether it was present
    ///
    /// Forward pointers are unlinked from the top level down, so a reader
    /// that already passed an upper level still reaches the node's
    /// successors through its intact lower pointers. The node itself is
    /// reclaimed once all concurrent readers are done.
    pub fn remove(&self, key: &K) -> bool {
        let _write = self.write_lock.lock();
        let guard = epoch::pin();

        let mut search_path: [Shared<'_, Node<K, V>>; MAX_HEIGHT] = [Shared::null(); MAX_HEIGHT];
        self.find_less(key, Some(&mut search_path), 0, &guard);

        let Some(prev) = (unsafe { search_path[0].as_ref() }) else {
            return false;
        };

        let node = prev.next[0].load(AtomicOrdering::Acquire, &guard);
        let Some(node_ref) = (unsafe { node.as_ref() }) else {
            return false;
        };
        if (self.compare)(key, node_ref.key()) != Ordering::Equal {
            return false;
        }

        for level in (0..self.height.load(AtomicOrdering::Acquire)).rev() {
            let prev_ref = unsafe { search_path[level].as_ref() }.unwrap();
            let next = prev_ref.next[level].load(AtomicOrdering::Acquire, &guard);

            if next != node {
                continue;
            }

            let succ = node_ref.next[level].load(AtomicOrdering::Acquire, &guard);
            prev_ref.next[level].store(succ, AtomicOrdering::Release);
        }

        unsafe { guard.defer_destroy(node) };

        if self.size.fetch_sub(1, AtomicOrdering::Relaxed) - 1 < 0 {
            panic!("skiplist: negative size");
        }

        true
    }

    /// Returns the value for the given key, if present
    pub fn get(&self, key: &K) -> Option<V> {
        let guard = epoch::pin();

        let prev = self.find_less(key, None, 0, &guard);
        let Some(prev_ref) = (unsafe { prev.as_ref() }) else {
            return None;
        };

        let node = prev_ref.next[0].load(AtomicOrdering::Acquire, &guard);
        let node_ref = unsafe { node.as_ref() }?;

        if (self.compare)(key, node_ref.key()) != Ordering::Equal {
            return None;
        }

        node_ref.load_value(&guard)
    }

    /// Returns true if the list contains the given key
    pub fn contains(&self, key: &K) -> bool {
        let guard = epoch::pin();

        let prev = self.find_less(key, None, 0, &guard);
        let Some(prev_ref) = (unsafe { prev.as_ref() }) else {
            return false;
        };

        let node = prev_ref.next[0].load(AtomicOrdering::Acquire, &guard);
        match unsafe { node.as_ref() } {
            Some(node_ref) => (self.compare)(key, node_ref.key()) == Ordering::Equal,
            None => false,
        }
    }

    /// Returns the entry with the greatest key that is less than or equal
    /// to the given key
    pub fn less_or_equal(&self, key: &K) -> Option<(K, V)> {
        let guard = epoch::pin();

        let mut node = self.find_less(key, None, 0, &guard);
        if node.is_null() {
            return None;
        }

        loop {
            let next = unsafe { node.as_ref() }.unwrap().next[0].load(AtomicOrdering::Acquire, &guard);

            match unsafe { next.as_ref() } {
                Some(next_ref) if (self.compare)(key, next_ref.key()) != Ordering::Less => {
                    node = next;
                }
                _ => break,
            }
        }

        let node_ref = unsafe { node.as_ref() }.unwrap();
        let key = node_ref.key.as_ref()?.clone();
        let value = node_ref.load_value(&guard)?;

        Some((key, value))
    }

    /// Returns a lazy forward iterator over the whole list
    ///
    /// The iterator sees a consistent level-0 ordering of keys; writes
    /// that race with the iteration may or may not be reflected.
    pub fn scan(&self) -> Iter<K, V> {
        let guard = epoch::pin();

        let head = self.head.load(AtomicOrdering::Acquire, &guard);
        let first = unsafe { head.as_ref() }.unwrap().next[0]
            .load(AtomicOrdering::Acquire, &guard)
            .as_raw();

        Iter { guard, node: first }
    }

    /// Returns a lazy forward iterator starting at the first key that is
    /// greater than or equal to the given key
    pub fn scan_from(&self, key: &K) -> Iter<K, V> {
        let guard = epoch::pin();

        let prev = self.find_less(key, None, 0, &guard);
        let first = match unsafe { prev.as_ref() } {
            Some(prev_ref) => prev_ref.next[0].load(AtomicOrdering::Acquire, &guard).as_raw(),
            None => std::ptr::null(),
        };

        Iter { guard, node: first }
    }
}

impl<K, V> Drop for SkipList<K, V> {
    fn drop(&mut self) {
        unsafe {
            let guard = epoch::unprotected();

            let mut node = self.head.load(AtomicOrdering::Relaxed, guard);
            while !node.is_null() {
                let next = node.as_ref().unwrap().next[0].load(AtomicOrdering::Relaxed, guard);
                drop(node.into_owned());
                node = next;
            }
        }
    }
}

/// A lazy, finite, non-restartable forward iterator
///
/// Holds an epoch guard for its whole lifetime, which keeps every node it
/// can still reach alive even if the writer unlinks them mid-iteration.
pub struct Iter<K, V> {
    guard: Guard,
    node: *const Node<K, V>,
}

impl<K, V> Iterator for Iter<K, V>
where
    K: Clone,
    V: Clone,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        let node = unsafe { self.node.as_ref() }?;

        let key = node.key().clone();
        let value = node.load_value(&self.guard)?;

        self.node = node.next[0].load(AtomicOrdering::Acquire, &self.guard).as_raw();

        Some((key, value))
    }
}
