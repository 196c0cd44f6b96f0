//! Highest contiguous completed index
//!
//! Workers finish out of order; the checkpoint may only claim an index once
//! every index before it is also finished.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct Watermark {
    /// Next index not yet known to be complete
    next: u64,
    /// Completed indices at or above `next`
    pending: BTreeSet<u64>,
}

impl Watermark {
    /// Start with every index below `next` already complete
    #[must_use]
    pub fn starting_at(next: u64) -> Self {
        Self {
            next,
            pending: BTreeSet::new(),
        }
    }

    /// Mark `index` complete; returns the new watermark if it advanced
    pub fn complete(&mut self, index: u64) -> Option<u64> {
        if index < self.next {
            return None;
        }
        self.pending.insert(index);
        let before = self.next;
        while self.pending.remove(&self.next) {
            self.next += 1;
        }
        (self.next != before).then(|| self.next - 1)
    }

    /// Highest index below which everything is complete
    #[must_use]
    pub fn current(&self) -> Option<u64> {
        self.next.checked_sub(1)
    }

    /// Completed indices still waiting on an earlier gap
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// The completed indices beyond the gap, ascending
    #[must_use]
    pub fn pending_indices(&self) -> Vec<u64> {
        self.pending.iter().copied().collect()
    }
}
