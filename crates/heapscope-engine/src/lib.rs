//! heapscope-engine: concurrent aggregation core of a live heap profiler
//!
//! An embedding runtime drives this engine from its heap-event hooks:
//! class loads register descriptors in the [`registry`], traversal
//! workers stream object sightings through [`walker::HeapVisitor`]s
//! into a pooled [`snapshot::Snapshot`], and the completed snapshot is
//! handed to the [`processor::SnapshotProcessor`], which ranks the
//! heaviest classes, raises threshold alerts, and recycles the
//! snapshot.
//!
//! The engine carries no process-wide state. Registry, pool, and
//! processor are plain values wired together by the caller, so several
//! independent engines can coexist in one process.
//!
//! ```
//! use heapscope_engine::{
//!     ClassIdentity, ClassInfo, ClassRegistry, HeapVisitor, ObjectLayout, ProfilerConfig,
//!     SnapshotPool, SnapshotProcessor, TraversalMode,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> heapscope_engine::ProfilerResult<()> {
//! let registry = Arc::new(ClassRegistry::new());
//! let pool = Arc::new(SnapshotPool::new(false));
//! let processor =
//!     SnapshotProcessor::new(registry.clone(), pool.clone(), ProfilerConfig::default())?;
//!
//! let snapshot = pool.acquire();
//! let visitor = HeapVisitor::new(
//!     snapshot.clone(),
//!     registry.new_shard(),
//!     TraversalMode::Exclusive,
//!     false,
//! );
//! visitor.visit_object(
//!     ClassIdentity(0x1000),
//!     || ClassInfo::new("com/example/Widget", ObjectLayout::Instance),
//!     || 48,
//! );
//!
//! processor.submit(snapshot)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod processor;
pub mod ranking;
pub mod registry;
pub mod snapshot;
pub mod walker;

pub use config::{ProfilerConfig, RankOrder};
pub use processor::{RankingEntry, RankingReport, ReportObserver, SnapshotProcessor};
pub use ranking::{HeapDelta, RankedSorter};
pub use registry::{
    ClassDescriptor, ClassIdentity, ClassInfo, ClassRegistry, ObjectLayout, ShardRegistry,
};
pub use snapshot::{Snapshot, SnapshotCause, SnapshotHeader, SnapshotPool};
pub use walker::{HeapVisitor, TraversalMode};

use thiserror::Error;

/// Errors surfaced by the aggregation engine.
#[derive(Debug, Error)]
pub enum ProfilerError {
    /// The snapshot processor has shut down and accepts no more work.
    #[error("snapshot processor has shut down")]
    ProcessorShutDown,

    /// The processor worker thread could not be spawned.
    #[error("failed to spawn processor thread: {0}")]
    ProcessorSpawn(#[from] std::io::Error),
}

/// Result alias for engine operations.
pub type ProfilerResult<T> = Result<T, ProfilerError>;
