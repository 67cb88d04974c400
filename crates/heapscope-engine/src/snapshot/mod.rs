//! Snapshot: one aggregation cycle's counter table
//!
//! A snapshot accumulates instance counts and byte totals per class
//! (and optionally per reference edge) under heavy concurrent write
//! load. Counter creation goes through concurrent-map insert-or-get so
//! creation of different classes' counters never contends; the single
//! map insert is the one point of truth for a (snapshot, class) pair.

mod counter;
mod header;
mod pool;

pub use counter::{ChildClassCounter, ClassCounter, CounterPair, ReferenceOffset};
pub use header::{
    GcStatistics, SnapshotCause, SnapshotHeader, BOM_BIG_ENDIAN, BOM_LITTLE_ENDIAN, GC_CAUSE_MAX,
    MAGIC_EXTENDED, MAGIC_REFTREE, MAGIC_SAFEPOINT,
};
pub use pool::{SnapshotPool, STOCK_CAPACITY};

use crate::registry::{ClassDescriptor, ClassIdentity};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One complete aggregation cycle's counters plus metadata header.
///
/// Insert and lookup are safe under concurrent access; iteration
/// (clear, unload cleanup, serialization) is only performed when no
/// traversal is writing, which the driver guarantees by calling those
/// operations outside a live traversal or at an exclusivity barrier.
pub struct Snapshot {
    header: Mutex<SnapshotHeader>,
    /// Class counters, keyed by descriptor tag.
    classes: DashMap<u64, Arc<ClassCounter>>,
    /// Edge counters, keyed by (parent descriptor tag, child identity).
    children: DashMap<(u64, ClassIdentity), Arc<ChildClassCounter>>,
    /// Skips redundant clears on recycled instances.
    cleared: AtomicBool,
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new(collect_reftree: bool) -> Self {
        Self {
            header: Mutex::new(SnapshotHeader::new(collect_reftree)),
            classes: DashMap::new(),
            children: DashMap::new(),
            cleared: AtomicBool::new(true),
        }
    }

    /// Access the metadata header.
    pub fn header(&self) -> MutexGuard<'_, SnapshotHeader> {
        self.header.lock()
    }

    /// Set the cycle cause.
    pub fn set_cause(&self, cause: SnapshotCause) {
        self.header.lock().cause = cause;
    }

    /// Set the snapshot timestamp (milliseconds since the Unix epoch).
    pub fn set_timestamp_ms(&self, millis: i64) {
        self.header.lock().timestamp_ms = millis;
    }

    /// Set the total heap size.
    pub fn set_total_heap_bytes(&self, bytes: i64) {
        self.header.lock().total_heap_bytes = bytes;
    }

    /// Fill GC and memory statistics into the header.
    pub fn set_runtime_info(&self, stats: &GcStatistics) {
        self.header.lock().set_runtime_info(stats);
    }

    /// Find the counter for a class, if one exists this cycle.
    pub fn find_class(&self, descriptor: &Arc<ClassDescriptor>) -> Option<Arc<ClassCounter>> {
        self.classes.get(&descriptor.tag()).map(|c| c.clone())
    }

    /// Insert-or-get the counter for a class.
    ///
    /// When two workers race on the first object of a class, exactly
    /// one counter is created and both observe it.
    pub fn push_class(&self, descriptor: &Arc<ClassDescriptor>) -> Arc<ClassCounter> {
        self.classes
            .entry(descriptor.tag())
            .or_insert_with(|| Arc::new(ClassCounter::new(descriptor.clone())))
            .clone()
    }

    /// Find the edge counter for (parent, child identity).
    pub fn find_child(
        &self,
        parent: &ClassCounter,
        child: ClassIdentity,
    ) -> Option<Arc<ChildClassCounter>> {
        self.children
            .get(&(parent.descriptor().tag(), child))
            .map(|c| c.clone())
    }

    /// Insert-or-get the edge counter for (parent, child).
    ///
    /// A fresh edge is also appended to the parent's child list under
    /// the parent's fine-grained lock; that lock is only taken when a
    /// new edge shape is first observed.
    pub fn push_child(
        &self,
        parent: &Arc<ClassCounter>,
        child: &Arc<ClassDescriptor>,
    ) -> Arc<ChildClassCounter> {
        let key = (parent.descriptor().tag(), child.identity());
        match self.children.entry(key) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                // An identity rewrite can leave the same edge counter
                // reachable under an old key; keep one counter per
                // (parent, child class) and alias the new key to it.
                if let Some(existing) = parent.find_child_by_tag(child.tag()) {
                    entry.insert(existing.clone());
                    existing
                } else {
                    let counter = Arc::new(ChildClassCounter::new(child.clone()));
                    entry.insert(counter.clone());
                    parent.push_child(counter.clone());
                    counter
                }
            }
        }
    }

    /// Mark the snapshot as holding live data.
    pub fn mark_dirty(&self) {
        self.cleared.store(false, Ordering::Relaxed);
    }

    /// Whether the snapshot is known to hold only zeroed counters.
    pub fn is_cleared(&self) -> bool {
        self.cleared.load(Ordering::Relaxed)
    }

    /// Reset every counter pair to zero.
    ///
    /// Map entries and cached reference-offset lists are kept: they
    /// are expensive to recompute and remain valid for the same class
    /// as long as it is not unloaded. No-op when the snapshot is
    /// already clear, unless `force` is set.
    pub fn clear(&self, force: bool) {
        if !force && self.is_cleared() {
            return;
        }

        for entry in self.classes.iter() {
            entry.value().clear_counts();
        }
        self.cleared.store(true, Ordering::Relaxed);
    }

    /// Drop all state tied to unloaded classes.
    ///
    /// For each unloaded class with a counter here: its edge counters
    /// are detached and their composite keys erased, its offset cache
    /// is dropped, and its pair is zeroed — the counter slot itself
    /// survives until the snapshot is recycled. Edge counters in other
    /// classes that reference an unloaded class are removed as well.
    ///
    /// Precondition (not detectable here): no traversal thread may be
    /// incrementing counters for the unloaded classes; the runtime
    /// must fire unload notifications at an exclusivity barrier.
    pub fn remove_object_data(&self, unloaded: &[Arc<ClassDescriptor>]) {
        let tags: FxHashSet<u64> = unloaded.iter().map(|d| d.tag()).collect();
        if tags.is_empty() {
            return;
        }

        self.children.retain(|(parent_tag, _), child| {
            !tags.contains(parent_tag) && !tags.contains(&child.descriptor().tag())
        });

        for entry in self.classes.iter() {
            let counter = entry.value();
            if tags.contains(&counter.descriptor().tag()) {
                counter.drain_children();
                counter.clear_offsets();
                counter.pair().reset();
            } else {
                counter.retain_children(|c| !tags.contains(&c.descriptor().tag()));
            }
        }
    }

    /// Number of class counters in this snapshot.
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Copy out all class counters (serialization/reporting path; only
    /// safe once the traversal that wrote them has quiesced).
    pub fn counters(&self) -> Vec<Arc<ClassCounter>> {
        self.classes.iter().map(|e| e.value().clone()).collect()
    }
}
