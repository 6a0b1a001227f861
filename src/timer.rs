//! Idle-deadline tracking.
//!
//! A binary min-heap ordered by expiry with a key → heap-index map, so a
//! key owns at most one entry and refreshing it re-sorts in place.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// One scheduled deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerNode<K> {
    pub id: K,
    pub expires: Instant,
}

/// Deadlines keyed by `K`, kept in expiry order
#[derive(Debug)]
pub struct HeapTimer<K> {
    heap: Vec<TimerNode<K>>,
    refs: HashMap<K, usize>,
}

impl<K: Copy + Eq + Hash> HeapTimer<K> {
    pub fn new() -> Self {
        Self {
            heap: Vec::with_capacity(64),
            refs: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, id: &K) -> bool {
        self.refs.contains_key(id)
    }

    /// Expiry currently scheduled for `id`
    pub fn expiry(&self, id: &K) -> Option<Instant> {
        self.refs.get(id).map(|&i| self.heap[i].expires)
    }

    /// Schedule `id` to expire at `expires`; an existing entry is rescheduled
    pub fn add(&mut self, id: K, expires: Instant) {
        if self.adjust(id, expires) {
            return;
        }

        let i = self.heap.len();
        self.refs.insert(id, i);
        self.heap.push(TimerNode { id, expires });
        self.sift_up(i);
    }

    /// Reschedule an existing entry; returns false when `id` has none
    pub fn adjust(&mut self, id: K, expires: Instant) -> bool {
        let Some(&i) = self.refs.get(&id) else {
            return false;
        };

        self.heap[i].expires = expires;
        if !self.sift_down(i) {
            self.sift_up(i);
        }
        true
    }

    /// Drop the entry for `id` without firing it
    pub fn cancel(&mut self, id: &K) -> bool {
        match self.refs.get(id) {
            Some(&i) => {
                self.remove_at(i);
                true
            }
            None => false,
        }
    }

    /// Remove every entry due at `now`, returned in ascending expiry order
    pub fn expire(&mut self, now: Instant) -> Vec<K> {
        let mut expired = Vec::new();
        while let Some(front) = self.heap.first() {
            if front.expires > now {
                break;
            }
            expired.push(front.id);
            self.remove_at(0);
        }
        expired
    }

    /// Time left until the earliest deadline, zero if one is already due
    pub fn next_expiry(&self, now: Instant) -> Option<Duration> {
        self.heap
            .first()
            .map(|node| node.expires.saturating_duration_since(now))
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.refs.clear();
    }

    fn remove_at(&mut self, i: usize) {
        let last = self.heap.len() - 1;
        if i < last {
            self.swap_node(i, last);
        }
        if let Some(node) = self.heap.pop() {
            self.refs.remove(&node.id);
        }
        if i < self.heap.len() && !self.sift_down(i) {
            self.sift_up(i);
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].expires <= self.heap[i].expires {
                break;
            }
            self.swap_node(i, parent);
            i = parent;
        }
    }

    /// Returns true if the node moved
    fn sift_down(&mut self, index: usize) -> bool {
        let n = self.heap.len();
        let mut i = index;
        loop {
            let mut child = i * 2 + 1;
            if child >= n {
                break;
            }
            if child + 1 < n && self.heap[child + 1].expires < self.heap[child].expires {
                child += 1;
            }
            if self.heap[i].expires <= self.heap[child].expires {
                break;
            }
            self.swap_node(i, child);
            i = child;
        }
        i > index
    }

    fn swap_node(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.refs.insert(self.heap[i].id, i);
        self.refs.insert(self.heap[j].id, j);
    }
}

impl<K: Copy + Eq + Hash> Default for HeapTimer<K> {
    fn default() -> Self {
        Self::new()
    }
}
