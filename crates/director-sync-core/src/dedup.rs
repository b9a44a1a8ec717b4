//! Bounded FIFO memory of processed message ids

use std::collections::{HashSet, VecDeque};

/// How many message ids are remembered before the oldest is forgotten
pub const MAX_SEEN_MESSAGE_IDS: usize = 2048;

/// Answers "was this message already processed?"
///
/// `ids` and `order` always hold the same entries; `ids` is authoritative
/// for membership, `order` decides eviction.
#[derive(Debug)]
pub struct MessageDeduplicator {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl Default for MessageDeduplicator {
    fn default() -> Self {
        Self::with_capacity(MAX_SEEN_MESSAGE_IDS)
    }
}

impl MessageDeduplicator {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ids: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Check-and-insert. Returns `true` if `id` was already recorded
    /// (state untouched), otherwise records it and returns `false`.
    pub fn seen(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return true;
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        false
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_sighting_is_duplicate() {
        let mut dedup = MessageDeduplicator::default();
        assert!(!dedup.seen("a"));
        assert_eq!(dedup.len(), 1);

        assert!(dedup.seen("a"));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_bound_holds_and_recent_ids_stay() {
        let mut dedup = MessageDeduplicator::default();
        let total = MAX_SEEN_MESSAGE_IDS * 2 + 17;
        for i in 0..total {
            assert!(!dedup.seen(&format!("msg-{i}")));
            assert!(dedup.len() <= MAX_SEEN_MESSAGE_IDS);
            assert_eq!(dedup.ids.len(), dedup.order.len());
        }
        assert_eq!(dedup.len(), MAX_SEEN_MESSAGE_IDS);

        for i in (total - MAX_SEEN_MESSAGE_IDS)..total {
            assert!(dedup.contains(&format!("msg-{i}")));
        }
        assert!(!dedup.contains(&format!("msg-{}", total - MAX_SEEN_MESSAGE_IDS - 1)));
    }

    #[test]
    fn test_oldest_evicted_first() {
        let mut dedup = MessageDeduplicator::with_capacity(2);
        dedup.seen("a");
        dedup.seen("b");
        dedup.seen("c");

        assert!(!dedup.contains("a"));
        assert!(dedup.contains("b"));
        assert!(dedup.contains("c"));

        // "a" was forgotten, so it counts as new again
        assert!(!dedup.seen("a"));
        assert!(!dedup.contains("b"));
    }
}
