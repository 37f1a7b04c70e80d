//! Vacuum: deletes data files no longer referenced by the current snapshot
//! once they are outside the retention window (spec §4.9, P7, S6).

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use crate::actions::Action;
use crate::error::{DeltaResult, Error};
use crate::log::{codec, LogSegment};
use crate::table::Table;

/// Vacuum refuses to run below this retention, matching the spec's floor.
pub const MIN_RETENTION_HOURS: i64 = 1;

#[derive(Debug, Clone)]
pub struct VacuumOptions {
    pub retention_hours: i64,
    pub dry_run: bool,
}

impl Default for VacuumOptions {
    fn default() -> Self {
        VacuumOptions {
            retention_hours: 168,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VacuumMetrics {
    pub files_deleted: u64,
    pub files_retained: u64,
    /// Files eligible for deletion (populated for both dry-run and real runs).
    pub candidates: Vec<String>,
    pub failures: Vec<String>,
}

/// `now_millis` is supplied by the caller rather than read from the system
/// clock, so callers can simulate the passage of time (spec S6: "advance
/// simulated time by 169 hours").
pub async fn vacuum(table: &Table, options: VacuumOptions, now_millis: i64) -> DeltaResult<VacuumMetrics> {
    if options.retention_hours < MIN_RETENTION_HOURS {
        return Err(Error::RetentionViolation(format!(
            "retentionHours must be >= {MIN_RETENTION_HOURS}, got {}",
            options.retention_hours
        )));
    }
    let retention_ms = options.retention_hours * 3_600_000;

    let snapshot = table.snapshot_at(None).await?;
    let active: HashSet<String> = snapshot.files.iter().map(|a| a.path.clone()).collect();

    // Tombstone timestamps come from the raw commit log, not the
    // checkpoint-reconciled snapshot: a checkpoint collapses removes away
    // entirely. History older than the retained log is invisible here, but
    // by the time the log is truncated those files should already be gone
    // (checkpoint::enforce_retention truncates commits only behind the
    // oldest retained checkpoint).
    let log_root = format!("{}_delta_log/", table.table_path());
    let segment = LogSegment::discover(table.store(), &log_root, None).await?;
    let mut tombstones: HashMap<String, i64> = HashMap::new();
    for commit in &segment.commits {
        let path = format!("{log_root}{}", commit.filename);
        let bytes = table.store().read(&path).await?;
        for action in codec::parse_actions(&bytes)? {
            if let Action::Remove(r) = action {
                let entry = tombstones.entry(r.path).or_insert(r.deletion_timestamp);
                *entry = (*entry).max(r.deletion_timestamp);
            }
        }
    }

    let all_paths = table.store().list(table.table_path()).await?;
    let mut metrics = VacuumMetrics::default();

    for path in all_paths {
        let relative = path
            .strip_prefix(table.table_path())
            .unwrap_or(path.as_str())
            .trim_start_matches('/');
        if relative.is_empty() || relative.starts_with("_delta_log") {
            continue;
        }
        if active.contains(relative) {
            continue;
        }

        let eligible = match tombstones.get(relative) {
            Some(deletion_timestamp) => now_millis - deletion_timestamp >= retention_ms,
            // An orphan never recorded in a `remove` (a write whose commit
            // was cancelled after staging data but before committing, per
            // Design Notes "Cancellation"): fall back to file age.
            None => match table.store().stat(&path).await? {
                Some(stat) => now_millis - stat.last_modified_millis >= retention_ms,
                None => false,
            },
        };

        if eligible {
            metrics.candidates.push(path);
        } else {
            metrics.files_retained += 1;
        }
    }

    if options.dry_run {
        return Ok(metrics);
    }

    let candidates = std::mem::take(&mut metrics.candidates);
    for path in candidates {
        match table.store().delete(&path).await {
            Ok(()) => metrics.files_deleted += 1,
            Err(e) => {
                warn!(path, error = %e, "vacuum: failed to delete orphaned file");
                metrics.failures.push(path);
            }
        }
    }
    info!(
        deleted = metrics.files_deleted,
        retained = metrics.files_retained,
        "vacuum complete"
    );
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ArrowParquetCodec;
    use crate::store::DefaultObjectStore;
    use crate::table::WriteOptions;
    use crate::value::{Row, Value};
    use object_store::memory::InMemory;
    use std::sync::Arc;

    fn table() -> Table {
        let store: Arc<dyn crate::store::ObjectStoreAdapter> =
            Arc::new(DefaultObjectStore::new(Arc::new(InMemory::new())));
        let codec: Arc<dyn crate::codec::ColumnarCodec> = Arc::new(ArrowParquetCodec::new());
        Table::new(store, codec, "t")
    }

    fn row(id: &str) -> Row {
        let mut r = Row::new();
        r.insert("id".to_string(), Value::Str(id.to_string()));
        r
    }

    #[tokio::test]
    async fn rejects_retention_below_one_hour() {
        let t = table();
        let err = vacuum(&t, VacuumOptions { retention_hours: 0, dry_run: false }, 0).await;
        assert!(matches!(err, Err(Error::RetentionViolation(_))));
    }

    #[tokio::test]
    async fn s6_retains_then_deletes_after_retention_elapses() {
        let t = table();
        t.write(vec![row("1")], WriteOptions::default()).await.unwrap();
        let filter = crate::filter::parse(&serde_json::json!({"id": "1"})).unwrap();
        t.delete_where(filter).await.unwrap();

        let now = 1_000_000_000_000i64; // arbitrary epoch millis
        let retained = vacuum(
            &t,
            VacuumOptions { retention_hours: 168, dry_run: false },
            now,
        )
        .await
        .unwrap();
        assert_eq!(retained.files_deleted, 0);
        assert_eq!(retained.files_retained, 1);

        let later = now + 169 * 3_600_000;
        let deleted = vacuum(
            &t,
            VacuumOptions { retention_hours: 168, dry_run: false },
            later,
        )
        .await
        .unwrap();
        assert_eq!(deleted.files_deleted, 1);
    }
}
