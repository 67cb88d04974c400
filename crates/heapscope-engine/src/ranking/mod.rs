//! Bounded top-K ranking sorter
//!
//! Keeps the K largest entries of an arbitrary-size input stream in
//! O(K) memory. K is the configured rank level — single digits to low
//! tens — while the stream can carry thousands of classes, so the
//! O(K) insertion walk is acceptable.

use std::cmp::Ordering;

/// Bounded insertion sorter holding the top K entries in ascending
/// order under a caller-supplied comparator.
pub struct RankedSorter<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    capacity: usize,
    entries: Vec<T>,
    cmp: F,
}

impl<T, F> RankedSorter<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    /// Create a sorter holding at most `capacity` entries.
    pub fn new(capacity: usize, cmp: F) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
            cmp,
        }
    }

    /// Offer a value.
    ///
    /// Below capacity the value is inserted in sorted position. At
    /// capacity the smallest entry is evicted only when `value`
    /// compares strictly greater than it; an equal value is discarded,
    /// so of two equal entries the first seen keeps the smaller slot.
    pub fn push(&mut self, value: T) {
        if self.capacity == 0 {
            return;
        }

        if self.entries.len() == self.capacity {
            match (self.cmp)(&self.entries[0], &value) {
                Ordering::Less => {
                    self.entries.remove(0);
                }
                _ => return,
            }
        }

        // First slot the value is strictly smaller than; equal entries
        // stay ahead of it (insertion order breaks ties).
        let index = self
            .entries
            .iter()
            .position(|entry| (self.cmp)(&value, entry) == Ordering::Less)
            .unwrap_or(self.entries.len());
        self.entries.insert(index, value);
    }

    /// Number of entries currently held (≤ K).
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Smallest held entry.
    pub fn smallest(&self) -> Option<&T> {
        self.entries.first()
    }

    /// Largest held entry.
    pub fn largest(&self) -> Option<&T> {
        self.entries.last()
    }

    /// Iterate entries from smallest to largest.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    /// Consume the sorter, yielding entries from largest to smallest.
    pub fn into_sorted_desc(self) -> Vec<T> {
        let mut entries = self.entries;
        entries.reverse();
        entries
    }
}

/// Per-class usage row fed to the ranking sorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapDelta {
    /// Descriptor tag of the class.
    pub tag: u64,
    /// Total bytes used by the class this cycle.
    pub usage: i64,
    /// Usage change since the previous cycle.
    pub delta: i64,
}

/// Order two rows by total usage.
pub fn by_usage(a: &HeapDelta, b: &HeapDelta) -> Ordering {
    a.usage.cmp(&b.usage)
}

/// Order two rows by usage delta.
pub fn by_delta(a: &HeapDelta, b: &HeapDelta) -> Ordering {
    a.delta.cmp(&b.delta)
}
