//! Profiler configuration

/// Which measure orders the top-K report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankOrder {
    /// Order by total bytes used this cycle.
    Usage,
    /// Order by usage change since the previous cycle.
    Delta,
}

/// Aggregation engine configuration.
#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    /// Number of entries in the ranked report (K).
    pub rank_level: usize,
    /// Measure the report is ordered by.
    pub order: RankOrder,
    /// Track parent→child reference edges during traversals.
    pub collect_reftree: bool,
    /// Skip zero-usage classes in reports and serialized rows.
    pub reduce_snapshot: bool,
    /// Per-class usage/delta alert threshold in bytes (0 = disabled).
    pub alert_threshold: i64,
    /// Whole-heap usage alert threshold in bytes (0 = disabled).
    pub heap_alert_threshold: i64,
    /// Metaspace usage alert threshold in bytes (0 = disabled).
    pub metaspace_alert_threshold: i64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            rank_level: 5,
            order: RankOrder::Usage,
            collect_reftree: false,
            reduce_snapshot: false,
            alert_threshold: 0,
            heap_alert_threshold: 0,
            metaspace_alert_threshold: 0,
        }
    }
}
