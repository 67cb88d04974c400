//! Snapshot header and cause metadata
//!
//! The header is the contract with the downstream serializer: field
//! order and widths in [`SnapshotHeader::encode_to`] are fixed.
//! Multi-byte fields are encoded little-endian, the canonical order
//! for the on-disk format; the byte-order mark records the producing
//! system's native order for diagnostic purposes.

use std::io::{self, Write};

/// Base magic: extended snapshot format (counts + metaspace data).
pub const MAGIC_EXTENDED: u8 = 0x80;
/// Magic flag: snapshot carries reference-edge data.
pub const MAGIC_REFTREE: u8 = 0x01;
/// Magic flag: snapshot carries safepoint time.
pub const MAGIC_SAFEPOINT: u8 = 0x02;

/// Maximum stored length of the GC-cause text, in bytes.
pub const GC_CAUSE_MAX: usize = 80;

/// Byte-order mark: little-endian producer.
pub const BOM_LITTLE_ENDIAN: u8 = 1;
/// Byte-order mark: big-endian producer.
pub const BOM_BIG_ENDIAN: u8 = 2;

/// What triggered a snapshot cycle.
///
/// Discriminants are part of the serialized format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SnapshotCause {
    /// Garbage collection completed.
    Gc = 1,
    /// User dump request.
    DumpRequest = 2,
    /// Timer interval elapsed.
    Interval = 3,
    /// User signal.
    Signal = 4,
    /// Secondary user signal.
    AnotherSignal = 5,
    /// Runtime resource exhausted.
    ResourceExhausted = 6,
    /// Thread resources exhausted.
    ThreadExhausted = 7,
    /// Deadlock detected.
    OccurredDeadlock = 8,
}

/// GC and memory statistics supplied by the embedding runtime.
#[derive(Debug, Clone, Default)]
pub struct GcStatistics {
    /// Human-readable GC cause (only meaningful for GC-triggered cycles).
    pub gc_cause: String,
    /// Wall time spent in GC, milliseconds.
    pub gc_work_time_ms: i64,
    /// Cumulative full-GC count.
    pub full_gc_count: i64,
    /// Cumulative young-GC count.
    pub young_gc_count: i64,
    /// Bytes used in the new (young) area.
    pub new_area_bytes: i64,
    /// Bytes used in the old area.
    pub old_area_bytes: i64,
    /// Metaspace usage in bytes.
    pub metaspace_usage_bytes: i64,
    /// Metaspace capacity in bytes.
    pub metaspace_capacity_bytes: i64,
}

/// Metadata header for one snapshot cycle.
#[derive(Debug, Clone)]
pub struct SnapshotHeader {
    /// Format magic (base + capability flags).
    pub magic: u8,
    /// Producing system's native byte order.
    pub byte_order_mark: u8,
    /// Snapshot timestamp, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Number of class rows in the snapshot body.
    pub class_count: i64,
    /// What triggered this cycle.
    pub cause: SnapshotCause,
    /// GC cause text (≤ [`GC_CAUSE_MAX`] bytes).
    pub gc_cause: String,
    /// Cumulative full-GC count.
    pub full_gc_count: i64,
    /// Cumulative young-GC count.
    pub young_gc_count: i64,
    /// GC work time, milliseconds.
    pub gc_work_time_ms: i64,
    /// New-area usage, bytes.
    pub new_area_bytes: i64,
    /// Old-area usage, bytes.
    pub old_area_bytes: i64,
    /// Total heap size, bytes.
    pub total_heap_bytes: i64,
    /// Metaspace usage, bytes.
    pub metaspace_usage_bytes: i64,
    /// Metaspace capacity, bytes.
    pub metaspace_capacity_bytes: i64,
    /// Safepoint time, milliseconds.
    pub safepoint_time_ms: i64,
}

impl SnapshotHeader {
    /// Create a header for a new cycle.
    pub fn new(collect_reftree: bool) -> Self {
        let mut magic = MAGIC_EXTENDED;
        if collect_reftree {
            magic |= MAGIC_REFTREE;
        }
        Self {
            magic,
            byte_order_mark: if cfg!(target_endian = "little") {
                BOM_LITTLE_ENDIAN
            } else {
                BOM_BIG_ENDIAN
            },
            timestamp_ms: 0,
            class_count: 0,
            cause: SnapshotCause::Interval,
            gc_cause: String::new(),
            full_gc_count: 0,
            young_gc_count: 0,
            gc_work_time_ms: 0,
            new_area_bytes: 0,
            old_area_bytes: 0,
            total_heap_bytes: 0,
            metaspace_usage_bytes: 0,
            metaspace_capacity_bytes: 0,
            safepoint_time_ms: 0,
        }
    }

    /// Fill GC and memory statistics from the runtime.
    ///
    /// GC cause text and work time are only recorded for GC-triggered
    /// cycles; other causes get an empty cause and zero work time.
    pub fn set_runtime_info(&mut self, stats: &GcStatistics) {
        if self.cause == SnapshotCause::Gc {
            let mut cause = stats.gc_cause.clone();
            if cause.len() > GC_CAUSE_MAX {
                let mut end = GC_CAUSE_MAX;
                while !cause.is_char_boundary(end) {
                    end -= 1;
                }
                cause.truncate(end);
            }
            self.gc_cause = cause;
            self.gc_work_time_ms = stats.gc_work_time_ms;
        } else {
            self.gc_cause.clear();
            self.gc_work_time_ms = 0;
        }

        self.full_gc_count = stats.full_gc_count;
        self.young_gc_count = stats.young_gc_count;
        self.new_area_bytes = stats.new_area_bytes;
        self.old_area_bytes = stats.old_area_bytes;
        self.metaspace_usage_bytes = stats.metaspace_usage_bytes;
        self.metaspace_capacity_bytes = stats.metaspace_capacity_bytes;
    }

    /// Record the safepoint time and mark the capability flag.
    pub fn set_safepoint_time(&mut self, millis: i64) {
        self.safepoint_time_ms = millis;
        self.magic |= MAGIC_SAFEPOINT;
    }

    /// Whether this snapshot carries reference-edge data.
    pub fn has_reftree(&self) -> bool {
        self.magic & MAGIC_REFTREE != 0
    }

    /// Serialized size of this header in bytes.
    pub fn encoded_len(&self) -> usize {
        // magic + bom + 12 i64 fields + cause i32 + cause text
        2 + 8 * 12 + 4 + self.gc_cause.len().min(GC_CAUSE_MAX)
    }

    /// Encode the header in serialization field order.
    pub fn encode_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let gc_cause = &self.gc_cause.as_bytes()[..self.gc_cause.len().min(GC_CAUSE_MAX)];

        writer.write_all(&[self.magic, self.byte_order_mark])?;
        writer.write_all(&self.timestamp_ms.to_le_bytes())?;
        writer.write_all(&self.class_count.to_le_bytes())?;
        writer.write_all(&(self.cause as i32).to_le_bytes())?;
        writer.write_all(&(gc_cause.len() as i64).to_le_bytes())?;
        writer.write_all(gc_cause)?;
        writer.write_all(&self.full_gc_count.to_le_bytes())?;
        writer.write_all(&self.young_gc_count.to_le_bytes())?;
        writer.write_all(&self.gc_work_time_ms.to_le_bytes())?;
        writer.write_all(&self.new_area_bytes.to_le_bytes())?;
        writer.write_all(&self.old_area_bytes.to_le_bytes())?;
        writer.write_all(&self.total_heap_bytes.to_le_bytes())?;
        writer.write_all(&self.metaspace_usage_bytes.to_le_bytes())?;
        writer.write_all(&self.metaspace_capacity_bytes.to_le_bytes())?;
        writer.write_all(&self.safepoint_time_ms.to_le_bytes())?;
        Ok(())
    }

    /// Log GC statistics for this cycle.
    pub fn log_gc_info(&self) {
        if self.cause == SnapshotCause::Gc {
            tracing::info!(
                gc_cause = %self.gc_cause,
                gc_work_time_ms = self.gc_work_time_ms,
                "GC cause and work time"
            );
        }
        tracing::info!(
            full_gc = self.full_gc_count,
            young_gc = self.young_gc_count,
            "GC count"
        );
        tracing::info!(
            new_bytes = self.new_area_bytes,
            old_bytes = self.old_area_bytes,
            total_bytes = self.total_heap_bytes,
            "area using size"
        );
        tracing::info!(
            usage_bytes = self.metaspace_usage_bytes,
            capacity_bytes = self.metaspace_capacity_bytes,
            "metaspace usage"
        );
    }
}
