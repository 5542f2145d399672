//! Duplicate detection for delivered frames.
//!
//! A sender retransmits when its ACK is lost, so the receiver can see the same
//! `(source, message id)` pair more than once. The [`SeenSet`] remembers the
//! most recent pairs handed to the application; a repeat is acknowledged again
//! but not delivered twice.
//!
//! Memory is bounded: when full, the least recently seen pair is evicted.

use crate::frame::{Address, MessageId};
use std::collections::{HashSet, VecDeque};

/// Key identifying a message on the medium.
pub type SeenKey = (Address, MessageId);

/// Result of recording a frame in the [`SeenSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "ignoring the seen result would deliver duplicates"]
pub enum SeenResult {
    /// First time this pair is seen; deliver it.
    New,
    /// Already delivered; acknowledge only.
    Duplicate,
}

/// Bounded recency-ordered history of delivered `(source, id)` pairs.
#[derive(Debug)]
pub struct SeenSet {
    capacity: usize,
    /// Oldest at the front, most recent at the back.
    order: VecDeque<SeenKey>,
    members: HashSet<SeenKey>,
}

impl SeenSet {
    /// Create an empty set. A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Record a pair, reporting whether it was already present.
    ///
    /// A duplicate moves the pair to the most recent position.
    pub fn insert(&mut self, source: Address, id: MessageId) -> SeenResult {
        let key = (source, id);

        if self.members.contains(&key) {
            self.touch(key);
            return SeenResult::Duplicate;
        }

        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.order.push_back(key);
        self.members.insert(key);
        SeenResult::New
    }

    /// Pair is present, without touching its position.
    pub fn contains(&self, source: Address, id: MessageId) -> bool {
        self.members.contains(&(source, id))
    }

    /// Number of remembered pairs.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Most pairs kept before the oldest is evicted.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }

    fn touch(&mut self, key: SeenKey) {
        if let Some(pos) = self.order.iter().position(|k| *k == key) {
            self.order.remove(pos);
            self.order.push_back(key);
        }
    }
}
