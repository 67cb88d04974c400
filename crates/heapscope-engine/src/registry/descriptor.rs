//! Class descriptors and identity keys

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Opaque runtime identity of a loaded class.
///
/// Supplied by the embedding runtime (typically the address of the
/// class's internal metadata). The runtime may rewrite the identity of
/// a descriptor in place when it relocates or redefines the class; see
/// [`ClassRegistry::update_identity`](super::ClassRegistry::update_identity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassIdentity(pub u64);

/// Object layout kind of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectLayout {
    /// Plain instance with a fixed field layout. Instance sizes are
    /// cached on the descriptor after the first measurement.
    Instance,
    /// Array object; size varies per instance.
    Array,
    /// Anything else (internal objects, primitive holders).
    Other,
}

/// Class description supplied by the runtime on first registration.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    /// Display name of the class.
    pub name: String,
    /// Layout kind.
    pub layout: ObjectLayout,
    /// Class-loader instance id (0 = bootstrap loader).
    pub loader_id: u64,
}

impl ClassInfo {
    /// Convenience constructor for a bootstrap-loaded class.
    pub fn new(name: impl Into<String>, layout: ObjectLayout) -> Self {
        Self {
            name: name.into(),
            layout,
            loader_id: 0,
        }
    }
}

/// Stable handle for a loaded class.
///
/// Created when a class-load event is observed and shared by the
/// registry, its shards, and every snapshot counter keyed by the
/// class. The descriptor survives identity rewrites (relocation or
/// redefinition); it is only dropped once the registry and every live
/// snapshot have released it.
pub struct ClassDescriptor {
    /// Unique tag assigned at registration; the report/row key.
    tag: u64,
    name: String,
    layout: ObjectLayout,
    loader_id: u64,
    /// Current runtime identity. Rewritten at an exclusivity barrier
    /// when the runtime moves or redefines the class.
    identity: AtomicU64,
    /// Instance size hint, cached after first measurement (0 = unset).
    instance_size: AtomicU64,
    /// Total bytes observed for this class in the previous cycle.
    previous_total: AtomicI64,
    /// Set once the class has been unloaded.
    removed: AtomicBool,
}

impl ClassDescriptor {
    pub(crate) fn new(tag: u64, identity: ClassIdentity, info: ClassInfo) -> Self {
        Self {
            tag,
            name: info.name,
            layout: info.layout,
            loader_id: info.loader_id,
            identity: AtomicU64::new(identity.0),
            instance_size: AtomicU64::new(0),
            previous_total: AtomicI64::new(0),
            removed: AtomicBool::new(false),
        }
    }

    /// Unique tag of this class (stable across identity rewrites).
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Display name of the class.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Layout kind of the class.
    pub fn layout(&self) -> ObjectLayout {
        self.layout
    }

    /// Class-loader instance id.
    pub fn loader_id(&self) -> u64 {
        self.loader_id
    }

    /// Current runtime identity.
    pub fn identity(&self) -> ClassIdentity {
        ClassIdentity(self.identity.load(Ordering::Acquire))
    }

    pub(crate) fn set_identity(&self, identity: ClassIdentity) {
        self.identity.store(identity.0, Ordering::Release);
    }

    /// Cached instance size, if one has been measured.
    pub fn instance_size_hint(&self) -> Option<u64> {
        match self.instance_size.load(Ordering::Relaxed) {
            0 => None,
            size => Some(size),
        }
    }

    /// Cache the instance size after the first measurement.
    pub fn cache_instance_size(&self, size: u64) {
        self.instance_size.store(size, Ordering::Relaxed);
    }

    /// Total bytes observed in the previous cycle (delta baseline).
    pub fn previous_total(&self) -> i64 {
        self.previous_total.load(Ordering::Relaxed)
    }

    pub(crate) fn set_previous_total(&self, total: i64) {
        self.previous_total.store(total, Ordering::Relaxed);
    }

    /// Whether the class has been unloaded.
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("tag", &self.tag)
            .field("name", &self.name)
            .field("layout", &self.layout)
            .field("identity", &self.identity())
            .field("removed", &self.is_removed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_identity_rewrite() {
        let desc = ClassDescriptor::new(
            1,
            ClassIdentity(0x1000),
            ClassInfo::new("com/example/Foo", ObjectLayout::Instance),
        );

        assert_eq!(desc.identity(), ClassIdentity(0x1000));
        desc.set_identity(ClassIdentity(0x2000));
        assert_eq!(desc.identity(), ClassIdentity(0x2000));

        // Tag and name survive the rewrite.
        assert_eq!(desc.tag(), 1);
        assert_eq!(desc.name(), "com/example/Foo");
    }

    #[test]
    fn test_instance_size_hint_starts_cold() {
        let desc = ClassDescriptor::new(
            2,
            ClassIdentity(0x3000),
            ClassInfo::new("com/example/Bar", ObjectLayout::Instance),
        );

        assert_eq!(desc.instance_size_hint(), None);
        desc.cache_instance_size(24);
        assert_eq!(desc.instance_size_hint(), Some(24));
    }

    #[test]
    fn test_previous_total_roundtrip() {
        let desc = ClassDescriptor::new(
            3,
            ClassIdentity(0x4000),
            ClassInfo::new("[I", ObjectLayout::Array),
        );

        assert_eq!(desc.previous_total(), 0);
        desc.set_previous_total(4096);
        assert_eq!(desc.previous_total(), 4096);
    }
}
