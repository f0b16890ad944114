//! Bounded, newest-first position history.

use std::collections::VecDeque;

use super::PositionSample;

/// Default number of samples kept per encounter.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Ordered, bounded sequence of position samples, newest first.
///
/// Ordering is insertion order, not timestamp order: a late sample is still
/// placed at the front. When full, the oldest entry is dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionHistory {
    entries: VecDeque<PositionSample>,
    capacity: usize,
}

impl Default for PositionHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl PositionHistory {
    /// Create an empty history. A capacity of zero is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { entries: VecDeque::with_capacity(capacity), capacity }
    }

    /// Prepend a sample, dropping the oldest entries beyond capacity.
    pub fn push(&mut self, sample: PositionSample) {
        self.entries.push_front(sample);
        self.entries.truncate(self.capacity);
    }

    /// Most recently inserted sample.
    pub fn latest(&self) -> Option<&PositionSample> {
        self.entries.front()
    }

    /// Iterate newest first.
    pub fn iter(&self) -> impl Iterator<Item = &PositionSample> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Copy of the samples, newest first.
    pub fn to_vec(&self) -> Vec<PositionSample> {
        self.entries.iter().copied().collect()
    }
}
