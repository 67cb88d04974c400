//! Snapshot pooling lifecycle
//!
//! Cycles are frequently triggered by memory-pressure events where
//! allocating a fresh counter table is itself risky, so a small stock
//! of cleared snapshots is kept for reuse. The pool also tracks every
//! live snapshot so a class unload can be applied to all of them in
//! one synchronized sweep.

use super::Snapshot;
use crate::registry::ClassDescriptor;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Maximum number of recycled snapshots kept in stock.
///
/// Small on purpose: the stock smooths allocation spikes, it is not a
/// cache.
pub const STOCK_CAPACITY: usize = 2;

/// Hands out and reclaims [`Snapshot`] instances.
///
/// Lock ordering: `stock` and `live` are guarded independently and are
/// never held at the same time; operations that need both take them
/// strictly one after the other, stock first.
pub struct SnapshotPool {
    collect_reftree: bool,
    /// Recycled instances ready for reuse.
    stock: Mutex<VecDeque<Arc<Snapshot>>>,
    /// Every snapshot currently in circulation (stocked instances
    /// included — they still hold class-keyed state that unload
    /// cleanup must visit).
    live: Mutex<Vec<Arc<Snapshot>>>,
}

impl SnapshotPool {
    /// Create an empty pool. `collect_reftree` selects whether
    /// constructed snapshots advertise reference-edge data.
    pub fn new(collect_reftree: bool) -> Self {
        Self {
            collect_reftree,
            stock: Mutex::new(VecDeque::with_capacity(STOCK_CAPACITY)),
            live: Mutex::new(Vec::new()),
        }
    }

    /// Get a snapshot for a new cycle.
    ///
    /// Pops a recycled instance if one is stocked, otherwise
    /// constructs a fresh one and registers it in the live set. A
    /// recycled instance reads (0, 0) for every counter that existed
    /// before release but keeps cached per-class reference-offset
    /// lists from its previous use.
    pub fn acquire(&self) -> Arc<Snapshot> {
        if let Some(snapshot) = self.stock.lock().pop_front() {
            return snapshot;
        }

        let snapshot = Arc::new(Snapshot::new(self.collect_reftree));
        self.live.lock().push(snapshot.clone());
        snapshot
    }

    /// Return a snapshot after its cycle is consumed.
    ///
    /// Below stock capacity the instance is cleared and stocked for
    /// reuse; otherwise it leaves the live set and is dropped. The
    /// caller must not touch the instance afterwards.
    pub fn release(&self, snapshot: Arc<Snapshot>) {
        let has_space = self.stock.lock().len() < STOCK_CAPACITY;
        if has_space {
            snapshot.clear(false);
            self.stock.lock().push_back(snapshot);
            return;
        }

        self.live.lock().retain(|s| !Arc::ptr_eq(s, &snapshot));
    }

    /// Apply unload cleanup to every live snapshot.
    ///
    /// Broadcasts [`Snapshot::remove_object_data`] so a class can be
    /// unloaded once and every outstanding snapshot (including ones
    /// mid-traversal) stays consistent. Same exclusivity-barrier
    /// precondition as the per-snapshot call.
    pub fn remove_object_data_from_all(&self, unloaded: &[Arc<ClassDescriptor>]) {
        let live = self.live.lock();
        for snapshot in live.iter() {
            snapshot.remove_object_data(unloaded);
        }
    }

    /// Number of snapshots currently in circulation.
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Number of recycled snapshots in stock.
    pub fn stock_count(&self) -> usize {
        self.stock.lock().len()
    }
}
