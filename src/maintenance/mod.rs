//! Maintenance operations: compaction, deduplication, Z-order clustering and
//! vacuum (spec §4.9). All four share a contract — stage new files, attempt
//! a single conditional `remove`+`add` commit, purge staged data on failure.

pub mod compaction;
pub mod dedup;
pub mod vacuum;
pub mod zorder;

pub use compaction::{compact, CompactionMetrics, CompactionOptions, CompactionStrategy};
pub use dedup::{dedup, DedupMetrics, DedupOptions, KeepStrategy};
pub use vacuum::{vacuum, VacuumMetrics, VacuumOptions, MIN_RETENTION_HOURS};
pub use zorder::{zorder, ZOrderMetrics, ZOrderOptions};

/// Commit timestamp for maintenance-authored actions. Maintenance never
/// replays or reasons about prior commits' wall-clock values, so reading the
/// clock here does not reintroduce the nondeterminism the snapshot/replay
/// path avoids.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
