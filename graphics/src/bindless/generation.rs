//! Per-slot generation counters.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;

use crate::types::{Generation, HeapIndex};

/// Lock-free generation per heap index, growing on demand.
#[derive(Debug, Default)]
pub struct GenerationTracker {
    slots: RwLock<Vec<AtomicU32>>,
}

impl GenerationTracker {
    pub fn new(capacity: usize) -> Self {
        let tracker = Self::default();
        tracker.ensure_capacity(capacity);
        tracker
    }

    pub fn ensure_capacity(&self, capacity: usize) {
        if self.slots.read().len() >= capacity {
            return;
        }
        let mut slots = self.slots.write();
        while slots.len() < capacity {
            slots.push(AtomicU32::new(0));
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.read().len()
    }

    pub fn load(&self, index: HeapIndex) -> Generation {
        self.slots
            .read()
            .get(index.index())
            .map_or(Generation::new(0), |g| Generation::new(g.load(Ordering::Acquire)))
    }

    /// Increments the generation and returns the new value.
    pub fn bump(&self, index: HeapIndex) -> Generation {
        self.ensure_capacity(index.index() + 1);
        let slots = self.slots.read();
        let previous = slots[index.index()].fetch_add(1, Ordering::AcqRel);
        Generation::new(previous.wrapping_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_grows_and_increments() {
        let tracker = GenerationTracker::new(2);
        assert_eq!(tracker.load(HeapIndex::new(5)), Generation::new(0));
        assert_eq!(tracker.bump(HeapIndex::new(5)), Generation::new(1));
        assert_eq!(tracker.bump(HeapIndex::new(5)), Generation::new(2));
        assert!(tracker.capacity() >= 6);
    }
}
