//! Counter pairs and per-class counter slots
//!
//! The (count, bytes) pair is the hot-path data structure: every
//! object visit bumps one. The pair must never be observed torn, so
//! the contended path goes through a compare-exchange retry loop over
//! the packed 16-byte value.

use crate::registry::ClassDescriptor;
use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;
use std::sync::Arc;

/// Packed (count, bytes) value. 16 bytes, copied atomically as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct PairValue {
    count: i64,
    bytes: i64,
}

/// Paired (instance count, total byte size) counter.
///
/// Both fields update as one indivisible unit: no observer ever sees a
/// state where only one of the two has moved.
pub struct CounterPair {
    cell: AtomicCell<PairValue>,
}

impl CounterPair {
    /// Create a zeroed pair.
    pub fn new() -> Self {
        Self {
            cell: AtomicCell::new(PairValue::default()),
        }
    }

    /// Add 1 to the count and `size` to the total, atomically as a
    /// pair. Safe under any number of concurrent writers.
    #[inline]
    pub fn increment(&self, size: i64) {
        self.add(1, size);
    }

    /// Fold `(count, bytes)` into the pair atomically.
    pub fn add(&self, count: i64, bytes: i64) {
        let mut current = self.cell.load();
        loop {
            let next = PairValue {
                count: current.count + count,
                bytes: current.bytes + bytes,
            };
            match self.cell.compare_exchange(current, next) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Plain add without the retry loop.
    ///
    /// Callers must guarantee exclusive access for the whole
    /// traversal, e.g. a stop-the-world phase where no mutator or
    /// other worker touches this counter.
    #[inline]
    pub fn fast_increment(&self, size: i64) {
        let current = self.cell.load();
        self.cell.store(PairValue {
            count: current.count + 1,
            bytes: current.bytes + size,
        });
    }

    /// Fold this pair's value into `dst`.
    ///
    /// Used to merge per-thread partial results into a shared
    /// aggregate or roll a child total up into a coarser bucket.
    pub fn merge_into(&self, dst: &CounterPair) {
        let value = self.cell.load();
        dst.add(value.count, value.bytes);
    }

    /// Read the pair as a whole.
    pub fn get(&self) -> (i64, i64) {
        let value = self.cell.load();
        (value.count, value.bytes)
    }

    /// Reset the pair to zero.
    pub fn reset(&self) {
        self.cell.store(PairValue::default());
    }

    /// Whether the pair reads (0, 0).
    pub fn is_zero(&self) -> bool {
        self.cell.load() == PairValue::default()
    }
}

impl Default for CounterPair {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CounterPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (count, bytes) = self.get();
        f.debug_struct("CounterPair")
            .field("count", &count)
            .field("bytes", &bytes)
            .finish()
    }
}

/// One block of reference-field offsets to traverse for edge counting.
///
/// Computed by the external heap walker; opaque to this engine beyond
/// caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceOffset {
    /// Byte offset of the first reference field in the block.
    pub offset: u32,
    /// Number of consecutive reference fields in the block.
    pub length: u32,
}

/// Counter slot for one (snapshot, class) pair.
pub struct ClassCounter {
    descriptor: Arc<ClassDescriptor>,
    pair: CounterPair,
    /// Child-class edge counters, append-only within a cycle. The
    /// lock guards only this list; steady-state increments on
    /// already-discovered edges never take it.
    children: Mutex<Vec<Arc<ChildClassCounter>>>,
    /// Reference-offset list, computed once per class per snapshot and
    /// reused cycle over cycle until the class is unloaded.
    offsets: Mutex<Option<Arc<[ReferenceOffset]>>>,
}

impl ClassCounter {
    pub(crate) fn new(descriptor: Arc<ClassDescriptor>) -> Self {
        Self {
            descriptor,
            pair: CounterPair::new(),
            children: Mutex::new(Vec::new()),
            offsets: Mutex::new(None),
        }
    }

    /// Descriptor of the counted class.
    pub fn descriptor(&self) -> &Arc<ClassDescriptor> {
        &self.descriptor
    }

    /// The (count, bytes) pair.
    pub fn pair(&self) -> &CounterPair {
        &self.pair
    }

    /// Copy out the child counters (ordered by first discovery).
    pub fn children(&self) -> Vec<Arc<ChildClassCounter>> {
        self.children.lock().clone()
    }

    pub(crate) fn push_child(&self, child: Arc<ChildClassCounter>) {
        self.children.lock().push(child);
    }

    pub(crate) fn find_child_by_tag(&self, tag: u64) -> Option<Arc<ChildClassCounter>> {
        self.children
            .lock()
            .iter()
            .find(|c| c.descriptor().tag() == tag)
            .cloned()
    }

    pub(crate) fn retain_children(&self, mut keep: impl FnMut(&ChildClassCounter) -> bool) {
        self.children.lock().retain(|c| keep(c));
    }

    pub(crate) fn drain_children(&self) -> Vec<Arc<ChildClassCounter>> {
        std::mem::take(&mut *self.children.lock())
    }

    /// Cached reference-offset list, if one has been computed.
    pub fn offsets(&self) -> Option<Arc<[ReferenceOffset]>> {
        self.offsets.lock().clone()
    }

    /// Get the cached offset list, computing and caching it if cold.
    pub fn offsets_or_compute(
        &self,
        compute: impl FnOnce() -> Vec<ReferenceOffset>,
    ) -> Arc<[ReferenceOffset]> {
        let mut offsets = self.offsets.lock();
        match &*offsets {
            Some(cached) => cached.clone(),
            None => {
                let computed: Arc<[ReferenceOffset]> = compute().into();
                *offsets = Some(computed.clone());
                computed
            }
        }
    }

    pub(crate) fn clear_offsets(&self) {
        *self.offsets.lock() = None;
    }

    /// Reset this counter and all child counters to zero.
    ///
    /// Map entries and the offset cache stay; recomputing them is
    /// expensive and their keys remain valid until the class unloads.
    pub(crate) fn clear_counts(&self) {
        for child in self.children.lock().iter() {
            child.pair().reset();
        }
        self.pair.reset();
    }
}

impl std::fmt::Debug for ClassCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassCounter")
            .field("class", &self.descriptor.name())
            .field("pair", &self.pair)
            .finish()
    }
}

/// Edge counter: objects of one class reachable from a parent class
/// via a reference field.
pub struct ChildClassCounter {
    descriptor: Arc<ClassDescriptor>,
    pair: CounterPair,
}

impl ChildClassCounter {
    pub(crate) fn new(descriptor: Arc<ClassDescriptor>) -> Self {
        Self {
            descriptor,
            pair: CounterPair::new(),
        }
    }

    /// Descriptor of the referenced (child) class.
    pub fn descriptor(&self) -> &Arc<ClassDescriptor> {
        &self.descriptor
    }

    /// The (count, bytes) pair for this edge.
    pub fn pair(&self) -> &CounterPair {
        &self.pair
    }
}

impl std::fmt::Debug for ChildClassCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildClassCounter")
            .field("class", &self.descriptor.name())
            .field("pair", &self.pair)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ClassIdentity, ClassInfo, ObjectLayout};
    use std::thread;

    fn descriptor(tag: u64, name: &str) -> Arc<ClassDescriptor> {
        Arc::new(ClassDescriptor::new(
            tag,
            ClassIdentity(tag << 4),
            ClassInfo::new(name, ObjectLayout::Instance),
        ))
    }

    #[test]
    fn test_pair_increment() {
        let pair = CounterPair::new();
        pair.increment(16);
        pair.increment(24);
        assert_eq!(pair.get(), (2, 40));
    }

    #[test]
    fn test_pair_fast_increment() {
        let pair = CounterPair::new();
        pair.fast_increment(8);
        pair.fast_increment(8);
        pair.fast_increment(8);
        assert_eq!(pair.get(), (3, 24));
    }

    #[test]
    fn test_pair_merge_into() {
        let src = CounterPair::new();
        let dst = CounterPair::new();
        src.add(5, 100);
        dst.add(1, 10);

        src.merge_into(&dst);
        assert_eq!(dst.get(), (6, 110));
        // Source is unchanged by the merge.
        assert_eq!(src.get(), (5, 100));
    }

    #[test]
    fn test_pair_reset() {
        let pair = CounterPair::new();
        pair.add(3, 33);
        assert!(!pair.is_zero());
        pair.reset();
        assert!(pair.is_zero());
        assert_eq!(pair.get(), (0, 0));
    }

    #[test]
    fn test_pair_concurrent_increment_never_tears() {
        const THREADS: usize = 8;
        const PER_THREAD: i64 = 10_000;
        const SIZE: i64 = 24;

        let pair = Arc::new(CounterPair::new());

        let mut handles = Vec::new();
        for _ in 0..THREADS {
            let pair = pair.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    pair.increment(SIZE);
                }
            }));
        }

        // Validator: every mid-run read must satisfy bytes == count * SIZE,
        // which fails if the pair is ever observed half-updated.
        let validator = {
            let pair = pair.clone();
            thread::spawn(move || {
                for _ in 0..50_000 {
                    let (count, bytes) = pair.get();
                    assert_eq!(bytes, count * SIZE, "torn pair observed");
                }
            })
        };

        for handle in handles {
            handle.join().unwrap();
        }
        validator.join().unwrap();

        let total = THREADS as i64 * PER_THREAD;
        assert_eq!(pair.get(), (total, total * SIZE));
    }

    #[test]
    fn test_offsets_computed_once() {
        let counter = ClassCounter::new(descriptor(1, "A"));
        let mut calls = 0;

        let first = counter.offsets_or_compute(|| {
            calls += 1;
            vec![ReferenceOffset {
                offset: 16,
                length: 2,
            }]
        });
        assert_eq!(first.len(), 1);

        let second = counter.offsets_or_compute(|| {
            calls += 1;
            Vec::new()
        });
        assert_eq!(second.len(), 1);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_clear_counts_keeps_offsets() {
        let counter = ClassCounter::new(descriptor(2, "B"));
        counter.pair().add(4, 64);
        counter.offsets_or_compute(|| {
            vec![ReferenceOffset {
                offset: 8,
                length: 1,
            }]
        });

        counter.clear_counts();

        assert_eq!(counter.pair().get(), (0, 0));
        assert!(counter.offsets().is_some());
    }
}
