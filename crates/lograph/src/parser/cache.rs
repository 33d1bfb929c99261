use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// Bounded membership set with FIFO eviction.
///
/// Used to suppress retransmitted packets: only recent entries are
/// remembered, so a duplicate older than `capacity` insertions counts as new.
#[derive(Debug, Clone)]
pub struct SlidingCache<T> {
    capacity: usize,
    members: HashSet<T>,
    order: VecDeque<T>,
}

impl<T: Eq + Hash + Clone> SlidingCache<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            members: HashSet::with_capacity(capacity + 1),
            order: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Returns true when `entry` is already cached. Otherwise inserts it,
    /// evicting the oldest entries past capacity, and returns false.
    pub fn hit(&mut self, entry: T) -> bool {
        if self.members.contains(&entry) {
            return true;
        }

        self.members.insert(entry.clone());
        self.order.push_back(entry);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        false
    }

    pub fn contains(&self, entry: &T) -> bool {
        self.members.contains(entry)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_entry_evicted_past_capacity() {
        let mut cache = SlidingCache::new(3);
        for entry in ["A", "B", "C", "D"] {
            assert!(!cache.hit(entry), "first sight of {entry}");
        }

        assert!(!cache.contains(&"A"));
        assert!(cache.hit("D"));
        assert!(!cache.hit("A"), "A was evicted");
    }

    #[test]
    fn test_repeated_hit_does_not_refresh_position() {
        let mut cache = SlidingCache::new(2);
        cache.hit(1);
        cache.hit(2);
        assert!(cache.hit(1));
        cache.hit(3);
        // 1 was still the oldest insertion
        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_tuple_keys() {
        let mut cache = SlidingCache::new(16);
        let key = ("10.0.98.1".to_string(), "6124".to_string(), 1000u64);
        assert!(!cache.hit(key.clone()));
        assert!(cache.hit(key));
    }

    #[test]
    fn test_zero_capacity_never_hits() {
        let mut cache = SlidingCache::new(0);
        assert!(!cache.hit("A"));
        assert!(!cache.hit("A"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut cache = SlidingCache::new(4);
        cache.hit("A");
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.hit("A"));
        assert_eq!(cache.capacity(), 4);
    }
}
