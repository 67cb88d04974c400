//! Traversal-side visitor facade
//!
//! The heap walker itself (object graph iteration, size measurement)
//! lives in the embedding runtime; this module is the seam it drives.
//! A [`HeapVisitor`] binds one worker to a snapshot and a registry
//! shard for the duration of a traversal and routes every object
//! sighting into the right counter.

use crate::registry::{ClassIdentity, ClassInfo, ObjectLayout, ShardRegistry};
use crate::snapshot::{ChildClassCounter, ClassCounter, CounterPair, ReferenceOffset, Snapshot};
use std::sync::Arc;

/// Concurrency regime of the traversal feeding a visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalMode {
    /// Stop-the-world traversal: no mutator or other worker touches
    /// the counters this visitor writes, so plain load/store bumps are
    /// safe.
    Exclusive,
    /// Traversal concurrent with mutators or other workers sharing
    /// counters; every bump goes through the atomic pair update.
    Concurrent,
}

/// Per-worker visitor for one traversal over one snapshot.
pub struct HeapVisitor {
    snapshot: Arc<Snapshot>,
    shard: Arc<ShardRegistry>,
    mode: TraversalMode,
    collect_reftree: bool,
}

impl HeapVisitor {
    /// Bind a visitor to a snapshot and a registry shard.
    ///
    /// Marks the snapshot dirty up front so a later unforced clear
    /// cannot skip it.
    pub fn new(
        snapshot: Arc<Snapshot>,
        shard: Arc<ShardRegistry>,
        mode: TraversalMode,
        collect_reftree: bool,
    ) -> Self {
        snapshot.mark_dirty();
        Self {
            snapshot,
            shard,
            mode,
            collect_reftree,
        }
    }

    /// Record one live object of the class identified by `identity`.
    ///
    /// `info` is invoked only when the class has never been registered;
    /// `measure` is invoked unless the class is a plain instance whose
    /// size is already cached on its descriptor. Returns the class
    /// counter so the caller can walk the object's reference fields
    /// against it.
    pub fn visit_object(
        &self,
        identity: ClassIdentity,
        info: impl FnOnce() -> ClassInfo,
        measure: impl FnOnce() -> i64,
    ) -> Arc<ClassCounter> {
        let descriptor = self.shard.resolve(identity, info);

        let size = match descriptor.layout() {
            ObjectLayout::Instance => match descriptor.instance_size_hint() {
                Some(size) => size as i64,
                None => {
                    let size = measure();
                    descriptor.cache_instance_size(size as u64);
                    size
                }
            },
            _ => measure(),
        };

        let counter = match self.snapshot.find_class(&descriptor) {
            Some(counter) => counter,
            None => self.snapshot.push_class(&descriptor),
        };
        self.bump(counter.pair(), size);
        counter
    }

    /// Record one reference edge from an object of `parent`'s class to
    /// an object of the class identified by `child`.
    ///
    /// No-op (returning `None`) unless the visitor was created with
    /// reference-edge collection enabled.
    pub fn visit_reference(
        &self,
        parent: &Arc<ClassCounter>,
        child: ClassIdentity,
        info: impl FnOnce() -> ClassInfo,
        measure: impl FnOnce() -> i64,
    ) -> Option<Arc<ChildClassCounter>> {
        if !self.collect_reftree {
            return None;
        }

        let descriptor = self.shard.resolve(child, info);
        let counter = match self.snapshot.find_child(parent, descriptor.identity()) {
            Some(counter) => counter,
            None => self.snapshot.push_child(parent, &descriptor),
        };
        self.bump(counter.pair(), measure());
        Some(counter)
    }

    /// Reference-field offsets for `counter`'s class, computing and
    /// caching them on first use. The cache survives snapshot reuse
    /// and is only invalidated by class unload.
    pub fn reference_offsets(
        &self,
        counter: &ClassCounter,
        compute: impl FnOnce() -> Vec<ReferenceOffset>,
    ) -> Arc<[ReferenceOffset]> {
        counter.offsets_or_compute(compute)
    }

    /// Snapshot this visitor writes into.
    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    fn bump(&self, pair: &CounterPair, size: i64) {
        match self.mode {
            TraversalMode::Exclusive => pair.fast_increment(size),
            TraversalMode::Concurrent => pair.increment(size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ClassRegistry;
    use std::thread;

    fn instance(name: &str) -> ClassInfo {
        ClassInfo::new(name, ObjectLayout::Instance)
    }

    #[test]
    fn test_visit_object_counts_and_caches_size() {
        let registry = Arc::new(ClassRegistry::new());
        let shard = registry.new_shard();
        let snapshot = Arc::new(Snapshot::new(false));
        let visitor = HeapVisitor::new(
            snapshot.clone(),
            shard,
            TraversalMode::Exclusive,
            false,
        );

        let mut measured = 0;
        for _ in 0..3 {
            visitor.visit_object(ClassIdentity(0x10), || instance("A"), || {
                measured += 1;
                24
            });
        }

        // Instance size was measured once and reused from the hint.
        assert_eq!(measured, 1);
        let descriptor = registry.find(ClassIdentity(0x10)).unwrap();
        assert_eq!(descriptor.instance_size_hint(), Some(24));

        let counter = snapshot.find_class(&descriptor).unwrap();
        assert_eq!(counter.pair().get(), (3, 72));
        assert!(!snapshot.is_cleared());
    }

    #[test]
    fn test_array_sizes_measured_every_visit() {
        let registry = Arc::new(ClassRegistry::new());
        let shard = registry.new_shard();
        let snapshot = Arc::new(Snapshot::new(false));
        let visitor = HeapVisitor::new(
            snapshot.clone(),
            shard,
            TraversalMode::Exclusive,
            false,
        );

        let info = || ClassInfo::new("[B", ObjectLayout::Array);
        visitor.visit_object(ClassIdentity(0x20), info, || 16);
        visitor.visit_object(ClassIdentity(0x20), info, || 64);

        let descriptor = registry.find(ClassIdentity(0x20)).unwrap();
        assert_eq!(descriptor.instance_size_hint(), None);
        let counter = snapshot.find_class(&descriptor).unwrap();
        assert_eq!(counter.pair().get(), (2, 80));
    }

    #[test]
    fn test_visit_reference_disabled_is_noop() {
        let registry = Arc::new(ClassRegistry::new());
        let shard = registry.new_shard();
        let snapshot = Arc::new(Snapshot::new(false));
        let visitor = HeapVisitor::new(
            snapshot.clone(),
            shard,
            TraversalMode::Exclusive,
            false,
        );

        let parent =
            visitor.visit_object(ClassIdentity(0x30), || instance("Parent"), || 32);
        let edge = visitor.visit_reference(
            &parent,
            ClassIdentity(0x31),
            || instance("Child"),
            || 16,
        );

        assert!(edge.is_none());
        assert!(parent.children().is_empty());
    }

    #[test]
    fn test_visit_reference_counts_edges() {
        let registry = Arc::new(ClassRegistry::new());
        let shard = registry.new_shard();
        let snapshot = Arc::new(Snapshot::new(true));
        let visitor = HeapVisitor::new(
            snapshot.clone(),
            shard,
            TraversalMode::Exclusive,
            true,
        );

        let parent =
            visitor.visit_object(ClassIdentity(0x40), || instance("Parent"), || 32);
        for _ in 0..2 {
            visitor
                .visit_reference(&parent, ClassIdentity(0x41), || instance("Child"), || 16)
                .unwrap();
        }

        assert_eq!(parent.children().len(), 1);
        let edge = snapshot.find_child(&parent, ClassIdentity(0x41)).unwrap();
        assert_eq!(edge.pair().get(), (2, 32));
    }

    #[test]
    fn test_concurrent_visitors_share_one_counter() {
        const THREADS: usize = 8;
        const PER_THREAD: i64 = 5_000;
        const SIZE: i64 = 16;

        let registry = Arc::new(ClassRegistry::new());
        let snapshot = Arc::new(Snapshot::new(false));

        let mut handles = Vec::new();
        for _ in 0..THREADS {
            let shard = registry.new_shard();
            let snapshot = snapshot.clone();
            handles.push(thread::spawn(move || {
                let visitor =
                    HeapVisitor::new(snapshot, shard, TraversalMode::Concurrent, false);
                for _ in 0..PER_THREAD {
                    visitor.visit_object(ClassIdentity(0x50), || instance("Hot"), || SIZE);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 1);
        let descriptor = registry.find(ClassIdentity(0x50)).unwrap();
        let counter = snapshot.find_class(&descriptor).unwrap();
        let total = THREADS as i64 * PER_THREAD;
        assert_eq!(counter.pair().get(), (total, total * SIZE));
    }
}
