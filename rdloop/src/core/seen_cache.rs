//! Bounded set of already-handled request ids.

use std::collections::{HashSet, VecDeque};

/// Insertion-ordered id set that evicts the oldest ids once over capacity.
///
/// Owned by whichever consumer needs "handle each id once" semantics, so the
/// dedup state has an explicit lifetime and size.
#[derive(Debug, Clone)]
pub struct SeenCache {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl SeenCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Record `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if !self.members.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
