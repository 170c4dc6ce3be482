//! Capacity-limited identity set with FIFO-by-arrival eviction.
//!
//! A ring of slots records arrival order; a hash set answers membership.
//! Both live in one container so they can only change together.
//!
//! # Invariants
//! - `slots.len() <= capacity` and `cursor < capacity`.
//! - Every member of `members` occupies at least one slot.
//! - Once the ring is full, `cursor` points at the oldest arrival.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

use tracing::debug;

pub struct BoundedIdentitySet<K> {
    members: HashSet<K>,
    slots: Vec<K>,
    cursor: usize,
    capacity: usize,
}

impl<K: Hash + Eq + Clone + Debug> BoundedIdentitySet<K> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedIdentitySet capacity must be > 0");
        Self {
            members: HashSet::new(),
            slots: Vec::new(),
            cursor: 0,
            capacity,
        }
    }

    /// Record an arrival.  Returns `true` when `key` was not resident.
    ///
    /// Every arrival takes a slot, duplicates included, so eviction follows
    /// arrival order rather than distinct keys.
    pub fn admit(&mut self, key: K) -> bool {
        if self.slots.len() < self.capacity {
            self.slots.push(key.clone());
        } else {
            let oldest = std::mem::replace(&mut self.slots[self.cursor], key.clone());
            debug!("Identity set full, evicting oldest {oldest:?}");
            self.members.remove(&oldest);
            self.cursor += 1;
            if self.cursor >= self.capacity {
                self.cursor = 0;
            }
        }
        self.members.insert(key)
    }

    #[cfg(test)]
    pub fn contains(&self, key: &K) -> bool {
        self.members.contains(key)
    }

    /// Number of distinct resident keys.
    pub fn len(&self) -> usize {
        self.members.len()
    }
}
