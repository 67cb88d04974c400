//! Class registry: identity→descriptor map shared by all workers
//!
//! The root registry owns the authoritative map and a list of
//! per-worker shard registries. Lookup traffic during a traversal goes
//! to a shard (short lock on a map nobody else reads in the common
//! case); registration of a class unseen by that shard delegates to
//! the root. Identity rewrites and unload removals are broadcast to
//! every shard under a second, separate lock so no shard holds a stale
//! key.

mod descriptor;

pub use descriptor::{ClassDescriptor, ClassIdentity, ClassInfo, ObjectLayout};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Authoritative identity→descriptor map for all known classes.
pub struct ClassRegistry {
    /// Root map. The hot path is a short lock/unlock around a hash
    /// lookup; contention is reduced by sharding, not lock-freedom,
    /// because registration is rare next to counter increments.
    classes: Mutex<FxHashMap<ClassIdentity, Arc<ClassDescriptor>>>,
    /// Registered shards, under their own lock so broadcasts never
    /// contend with root map traffic.
    shards: Mutex<Vec<Arc<ShardRegistry>>>,
    /// Tag allocator. Tags are never reused.
    next_tag: AtomicU64,
}

impl ClassRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            classes: Mutex::new(FxHashMap::default()),
            shards: Mutex::new(Vec::new()),
            next_tag: AtomicU64::new(1),
        }
    }

    /// Look up a descriptor by runtime identity. No side effects.
    pub fn find(&self, identity: ClassIdentity) -> Option<Arc<ClassDescriptor>> {
        self.classes.lock().get(&identity).cloned()
    }

    /// Insert-or-get a descriptor for `identity`.
    ///
    /// If the class is already registered (two threads discovering the
    /// same class race here), the existing descriptor is returned and
    /// `info` is discarded. If the identity is registered for a
    /// *different* class (the runtime recycled the key without an
    /// unload event being delivered), the stale descriptor is retired
    /// and replaced.
    pub fn register(&self, identity: ClassIdentity, info: ClassInfo) -> Arc<ClassDescriptor> {
        let mut retired: Option<Arc<ClassDescriptor>> = None;
        let descriptor = {
            let mut classes = self.classes.lock();
            if let Some(existing) = classes.get(&identity) {
                if existing.name() == info.name && existing.loader_id() == info.loader_id {
                    return existing.clone();
                }
                // Identity recycled for another class: unload events
                // are occasionally lost, so retire the stale entry.
                let stale = existing.clone();
                stale.mark_removed();
                retired = Some(stale);
            }

            let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
            let descriptor = Arc::new(ClassDescriptor::new(tag, identity, info));
            classes.insert(identity, descriptor.clone());
            descriptor
        };

        if retired.is_some() {
            // Shards may still cache the stale descriptor under this
            // identity; replace it everywhere.
            let shards = self.shards.lock();
            for shard in shards.iter() {
                shard.replace(identity, descriptor.clone());
            }
            tracing::debug!(
                identity = identity.0,
                class = descriptor.name(),
                "retired stale descriptor for recycled class identity"
            );
        }

        descriptor
    }

    /// Rewrite the identity key for a registered descriptor in place.
    ///
    /// Used when the runtime moves or redefines a class. The rewrite
    /// is broadcast to every shard. Returns the descriptor if the old
    /// identity was known.
    pub fn update_identity(
        &self,
        old: ClassIdentity,
        new: ClassIdentity,
    ) -> Option<Arc<ClassDescriptor>> {
        let descriptor = {
            let mut classes = self.classes.lock();
            let descriptor = classes.remove(&old)?;
            descriptor.set_identity(new);
            classes.insert(new, descriptor.clone());
            descriptor
        };

        let shards = self.shards.lock();
        for shard in shards.iter() {
            shard.apply_update(old, new);
        }

        Some(descriptor)
    }

    /// Remove a class permanently, broadcasting to all shards.
    ///
    /// Only valid once the unload-synchronization contract has run:
    /// every live snapshot must already have been cleaned via
    /// [`SnapshotPool::remove_object_data_from_all`](crate::snapshot::SnapshotPool::remove_object_data_from_all).
    pub fn remove(&self, descriptor: &Arc<ClassDescriptor>) {
        descriptor.mark_removed();
        let identity = descriptor.identity();
        self.classes.lock().remove(&identity);

        let shards = self.shards.lock();
        for shard in shards.iter() {
            shard.apply_remove(identity);
        }
    }

    /// Create and track a new per-worker shard registry.
    pub fn new_shard(self: &Arc<Self>) -> Arc<ShardRegistry> {
        let shard = Arc::new(ShardRegistry {
            root: Arc::clone(self),
            classes: Mutex::new(FxHashMap::default()),
        });
        self.shards.lock().push(shard.clone());
        shard
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.classes.lock().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.classes.lock().is_empty()
    }

    /// Copy out all registered descriptors.
    ///
    /// The consumer iterates this working copy while workers may still
    /// be registering classes; copying keeps the root lock short.
    pub fn all_classes(&self) -> Vec<Arc<ClassDescriptor>> {
        self.classes.lock().values().cloned().collect()
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-worker shard of the class registry.
///
/// Owned by one traversal worker. Lookups hit the shard's own map;
/// registration delegates to the root and caches the result. The root
/// mutates shard maps only during identity-rewrite and unload
/// broadcasts, which run at exclusivity barriers.
pub struct ShardRegistry {
    root: Arc<ClassRegistry>,
    classes: Mutex<FxHashMap<ClassIdentity, Arc<ClassDescriptor>>>,
}

impl ShardRegistry {
    /// Look up a descriptor in this shard only.
    pub fn find(&self, identity: ClassIdentity) -> Option<Arc<ClassDescriptor>> {
        self.classes.lock().get(&identity).cloned()
    }

    /// Resolve a descriptor, registering it with the root if unseen.
    ///
    /// `info` is only invoked when the class is unknown to the root.
    pub fn resolve(
        &self,
        identity: ClassIdentity,
        info: impl FnOnce() -> ClassInfo,
    ) -> Arc<ClassDescriptor> {
        if let Some(descriptor) = self.find(identity) {
            return descriptor;
        }

        let descriptor = match self.root.find(identity) {
            Some(descriptor) => descriptor,
            None => self.root.register(identity, info()),
        };
        self.classes.lock().insert(identity, descriptor.clone());
        descriptor
    }

    /// Root registry this shard delegates to.
    pub fn root(&self) -> &Arc<ClassRegistry> {
        &self.root
    }

    fn apply_update(&self, old: ClassIdentity, new: ClassIdentity) {
        let mut classes = self.classes.lock();
        if let Some(descriptor) = classes.remove(&old) {
            classes.insert(new, descriptor);
        }
    }

    fn apply_remove(&self, identity: ClassIdentity) {
        self.classes.lock().remove(&identity);
    }

    fn replace(&self, identity: ClassIdentity, descriptor: Arc<ClassDescriptor>) {
        let mut classes = self.classes.lock();
        if classes.contains_key(&identity) {
            classes.insert(identity, descriptor);
        }
    }
}
