//! Snapshot consumer: ranking and report generation
//!
//! A single dedicated thread drains finished snapshots from a channel,
//! turns them into ranked reports, raises threshold alerts, and
//! returns each snapshot to the pool. The channel hand-off is the
//! synchronization point: every increment made during the traversal is
//! visible to the consumer once the driver submits the snapshot.

use crate::config::{ProfilerConfig, RankOrder};
use crate::ranking::{by_delta, by_usage, HeapDelta, RankedSorter};
use crate::registry::{ClassDescriptor, ClassRegistry};
use crate::snapshot::{Snapshot, SnapshotCause, SnapshotPool};
use crate::{ProfilerError, ProfilerResult};
use crossbeam::channel::{self, Receiver, Sender};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// One row of a finished ranking report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingEntry {
    /// Class display name.
    pub name: String,
    /// Live instance count this cycle.
    pub count: i64,
    /// Total bytes this cycle.
    pub bytes: i64,
    /// Byte change since the previous cycle.
    pub delta: i64,
}

/// Ranked "who is using the heap" report for one cycle.
#[derive(Debug, Clone)]
pub struct RankingReport {
    /// What triggered the cycle.
    pub cause: SnapshotCause,
    /// Cycle timestamp, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Number of classes with a reportable row this cycle.
    pub class_count: usize,
    /// Top-K entries, largest first.
    pub entries: Vec<RankingEntry>,
}

/// Callback invoked with each finished report.
pub type ReportObserver = Box<dyn Fn(&RankingReport) + Send + 'static>;

/// Consumer thread draining finished snapshots into ranked reports.
///
/// Dependencies are explicit constructor parameters — no process-wide
/// state — so isolated instances can run side by side in tests.
pub struct SnapshotProcessor {
    sender: Option<Sender<Arc<Snapshot>>>,
    handle: Option<JoinHandle<()>>,
    shutting_down: Arc<AtomicBool>,
}

impl SnapshotProcessor {
    /// Start a processor that logs reports.
    pub fn new(
        registry: Arc<ClassRegistry>,
        pool: Arc<SnapshotPool>,
        config: ProfilerConfig,
    ) -> ProfilerResult<Self> {
        Self::start(registry, pool, config, None)
    }

    /// Start a processor that also forwards each report to `observer`.
    pub fn with_observer(
        registry: Arc<ClassRegistry>,
        pool: Arc<SnapshotPool>,
        config: ProfilerConfig,
        observer: ReportObserver,
    ) -> ProfilerResult<Self> {
        Self::start(registry, pool, config, Some(observer))
    }

    fn start(
        registry: Arc<ClassRegistry>,
        pool: Arc<SnapshotPool>,
        config: ProfilerConfig,
        observer: Option<ReportObserver>,
    ) -> ProfilerResult<Self> {
        let (sender, receiver) = channel::unbounded();
        let shutting_down = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            registry,
            pool,
            config,
            observer,
            shutting_down: shutting_down.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("heapscope-processor".to_string())
            .spawn(move || worker.run(receiver))
            .map_err(ProfilerError::ProcessorSpawn)?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            shutting_down,
        })
    }

    /// Hand a filled snapshot to the consumer (the cycle-completion
    /// hook). The snapshot is reported and released, or released
    /// without a report if the processor is shutting down.
    pub fn submit(&self, snapshot: Arc<Snapshot>) -> ProfilerResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or(ProfilerError::ProcessorShutDown)?;
        sender
            .send(snapshot)
            .map_err(|_| ProfilerError::ProcessorShutDown)
    }

    /// Stop the consumer. Queued snapshots are drained and released
    /// without producing reports.
    pub fn shutdown(&mut self) {
        self.shutting_down.store(true, AtomicOrdering::SeqCst);
        self.sender = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SnapshotProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    registry: Arc<ClassRegistry>,
    pool: Arc<SnapshotPool>,
    config: ProfilerConfig,
    observer: Option<ReportObserver>,
    shutting_down: Arc<AtomicBool>,
}

impl Worker {
    fn run(&self, receiver: Receiver<Arc<Snapshot>>) {
        for snapshot in receiver.iter() {
            if self.shutting_down.load(AtomicOrdering::SeqCst) {
                self.pool.release(snapshot);
                continue;
            }
            self.process(snapshot);
        }
    }

    fn process(&self, snapshot: Arc<Snapshot>) {
        let report = self.build_report(&snapshot);
        snapshot.header().class_count = report.class_count as i64;

        self.check_memory_alerts(&snapshot);
        snapshot.header().log_gc_info();

        for (index, entry) in report.entries.iter().enumerate() {
            tracing::info!(
                rank = index + 1,
                class = %entry.name,
                count = entry.count,
                bytes = entry.bytes,
                delta = entry.delta,
                "heap usage ranking"
            );
        }
        if let Some(observer) = &self.observer {
            observer(&report);
        }

        self.pool.release(snapshot);
    }

    fn build_report(&self, snapshot: &Arc<Snapshot>) -> RankingReport {
        let classes = self.registry.all_classes();
        let capacity = usize::min(self.config.rank_level, classes.len());
        let cmp: fn(&HeapDelta, &HeapDelta) -> Ordering = match self.config.order {
            RankOrder::Usage => by_usage,
            RankOrder::Delta => by_delta,
        };
        let mut sorter = RankedSorter::new(capacity, cmp);
        let mut by_tag: FxHashMap<u64, (Arc<ClassDescriptor>, i64)> = FxHashMap::default();
        let mut rows = 0usize;

        for descriptor in classes {
            // Every known class gets a row, so deltas stay continuous
            // for classes with no live instances this cycle.
            let counter = match snapshot.find_class(&descriptor) {
                Some(counter) => counter,
                None => snapshot.push_class(&descriptor),
            };
            let (count, bytes) = counter.pair().get();
            let delta = bytes - descriptor.previous_total();
            descriptor.set_previous_total(bytes);

            if !self.config.reduce_snapshot || bytes > 0 {
                rows += 1;
            }

            self.check_class_alert(&descriptor, bytes, delta, count);
            sorter.push(HeapDelta {
                tag: descriptor.tag(),
                usage: bytes,
                delta,
            });
            by_tag.insert(descriptor.tag(), (descriptor, count));
        }

        let (cause, timestamp_ms) = {
            let header = snapshot.header();
            (header.cause, header.timestamp_ms)
        };
        let entries = sorter
            .into_sorted_desc()
            .into_iter()
            .filter_map(|row| {
                by_tag.get(&row.tag).map(|(descriptor, count)| RankingEntry {
                    name: descriptor.name().to_string(),
                    count: *count,
                    bytes: row.usage,
                    delta: row.delta,
                })
            })
            .collect();

        RankingReport {
            cause,
            timestamp_ms,
            class_count: rows,
            entries,
        }
    }

    fn check_memory_alerts(&self, snapshot: &Arc<Snapshot>) {
        let header = snapshot.header();

        if self.config.heap_alert_threshold > 0 {
            let usage = header.new_area_bytes + header.old_area_bytes;
            if usage > self.config.heap_alert_threshold {
                tracing::warn!(
                    usage_bytes = usage,
                    threshold_bytes = self.config.heap_alert_threshold,
                    "ALERT: heap usage exceeded the threshold"
                );
            }
        }

        if self.config.metaspace_alert_threshold > 0
            && header.metaspace_usage_bytes > self.config.metaspace_alert_threshold
        {
            tracing::warn!(
                usage_bytes = header.metaspace_usage_bytes,
                threshold_bytes = self.config.metaspace_alert_threshold,
                "ALERT: metaspace usage exceeded the threshold"
            );
        }
    }

    fn check_class_alert(
        &self,
        descriptor: &Arc<ClassDescriptor>,
        bytes: i64,
        delta: i64,
        count: i64,
    ) {
        if self.config.alert_threshold <= 0 {
            return;
        }

        match self.config.order {
            RankOrder::Usage if bytes >= self.config.alert_threshold => {
                tracing::warn!(
                    class = %descriptor.name(),
                    usage_bytes = bytes,
                    instances = count,
                    "ALERT(USAGE): class exceeded the threshold"
                );
            }
            RankOrder::Delta if delta >= self.config.alert_threshold => {
                tracing::warn!(
                    class = %descriptor.name(),
                    delta_bytes = delta,
                    instances = count,
                    "ALERT(DELTA): class exceeded the threshold"
                );
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ClassIdentity, ClassInfo, ObjectLayout};
    use std::sync::mpsc;
    use std::time::Duration;

    fn setup(
        names: &[&str],
    ) -> (
        Arc<ClassRegistry>,
        Arc<SnapshotPool>,
        Vec<Arc<ClassDescriptor>>,
    ) {
        let registry = Arc::new(ClassRegistry::new());
        let descriptors = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                registry.register(
                    ClassIdentity((i as u64 + 1) << 8),
                    ClassInfo::new(*name, ObjectLayout::Instance),
                )
            })
            .collect();
        (registry, Arc::new(SnapshotPool::new(false)), descriptors)
    }

    #[test]
    fn test_ranking_top_k_by_usage() {
        let (registry, pool, descriptors) = setup(&["A", "B", "C"]);
        let config = ProfilerConfig {
            rank_level: 2,
            ..Default::default()
        };

        let snapshot = pool.acquire();
        snapshot.mark_dirty();
        // A: 10 × 4 bytes, B: 5 × 8 bytes, C: 1 × 100 bytes.
        snapshot.push_class(&descriptors[0]).pair().add(10, 40);
        snapshot.push_class(&descriptors[1]).pair().add(5, 40);
        snapshot.push_class(&descriptors[2]).pair().add(1, 100);

        let (report_tx, report_rx) = mpsc::channel();
        let mut processor = SnapshotProcessor::with_observer(
            registry,
            pool.clone(),
            config,
            Box::new(move |report| {
                report_tx.send(report.clone()).unwrap();
            }),
        )
        .unwrap();

        processor.submit(snapshot).unwrap();
        let report = report_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        processor.shutdown();

        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries[0].name, "C");
        assert_eq!(report.entries[0].bytes, 100);
        assert_eq!(report.entries[1].name, "B");
        assert_eq!(report.entries[1].bytes, 40);
        assert_eq!(report.class_count, 3);

        // Snapshot went back to the pool after reporting.
        assert_eq!(pool.stock_count(), 1);
    }

    #[test]
    fn test_delta_computed_against_previous_cycle() {
        let (registry, pool, descriptors) = setup(&["A"]);
        let config = ProfilerConfig {
            rank_level: 1,
            order: RankOrder::Delta,
            ..Default::default()
        };

        let (report_tx, report_rx) = mpsc::channel();
        let mut processor = SnapshotProcessor::with_observer(
            registry,
            pool.clone(),
            config,
            Box::new(move |report| {
                report_tx.send(report.clone()).unwrap();
            }),
        )
        .unwrap();

        let first = pool.acquire();
        first.mark_dirty();
        first.push_class(&descriptors[0]).pair().add(2, 100);
        processor.submit(first).unwrap();
        let report = report_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(report.entries[0].delta, 100);

        let second = pool.acquire();
        second.mark_dirty();
        second.push_class(&descriptors[0]).pair().add(3, 160);
        processor.submit(second).unwrap();
        let report = report_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(report.entries[0].bytes, 160);
        assert_eq!(report.entries[0].delta, 60);

        processor.shutdown();
    }

    #[test]
    fn test_zero_usage_classes_get_rows_unless_reduced() {
        let (registry, pool, _descriptors) = setup(&["A", "B"]);

        let (report_tx, report_rx) = mpsc::channel();
        let mut processor = SnapshotProcessor::with_observer(
            registry.clone(),
            pool.clone(),
            ProfilerConfig {
                rank_level: 5,
                reduce_snapshot: true,
                ..Default::default()
            },
            Box::new(move |report| {
                report_tx.send(report.clone()).unwrap();
            }),
        )
        .unwrap();

        // Nothing was counted this cycle; with reduce_snapshot no row
        // is emitted, but every class still appears in the ranking pool.
        let snapshot = pool.acquire();
        processor.submit(snapshot).unwrap();
        let report = report_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(report.class_count, 0);
        assert_eq!(report.entries.len(), 2);

        processor.shutdown();
    }

    #[test]
    fn test_submit_after_shutdown_errors() {
        let (registry, pool, _descriptors) = setup(&["A"]);
        let mut processor =
            SnapshotProcessor::new(registry, pool.clone(), ProfilerConfig::default()).unwrap();

        processor.shutdown();

        let snapshot = pool.acquire();
        assert!(matches!(
            processor.submit(snapshot),
            Err(ProfilerError::ProcessorShutDown)
        ));
    }
}
