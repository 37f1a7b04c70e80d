//! Change data feed: a lazy, restartable sequence of per-row change records
//! derived from the commit log (spec §4.10). Consumers read a version range,
//! a timestamp range, or poll forward from a last-seen version; ordinary
//! snapshot reads never see these synthetic records.
//!
//! Each commit's `add`/`remove` actions (filtered to `data_change = true`,
//! which excludes compaction/Z-order rewrites) are read back and diffed as
//! row multisets: rows present in the removed files but not the added ones
//! are the rows that actually changed. This works precisely for this
//! engine's own write paths because unaffected rows always round-trip
//! byte-for-byte through `Table::rewrite_matching` — a row only disappears
//! from the diff if it was genuinely deleted or updated.

use std::collections::HashMap;

use crate::actions::Action;
use crate::error::DeltaResult;
use crate::log::{codec, LogSegment};
use crate::table::Table;
use crate::value::{value_to_json, Row};
use crate::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Insert,
    UpdatePreimage,
    UpdatePostimage,
    Delete,
}

#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub change_type: ChangeType,
    pub commit_version: Version,
    pub commit_timestamp: i64,
    pub row: Row,
}

fn row_key(row: &Row) -> String {
    let mut pairs: Vec<(&String, String)> = row.iter().map(|(k, v)| (k, value_to_json(v).to_string())).collect();
    pairs.sort();
    pairs.into_iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("\u{1}")
}

/// Subtracts `subtrahend` from `minuend` as multisets (keyed by canonical
/// row content), returning the leftover rows from `minuend` in their
/// original order.
fn multiset_difference(minuend: Vec<Row>, subtrahend: &[Row]) -> Vec<Row> {
    let mut counts: HashMap<String, i64> = HashMap::new();
    for row in subtrahend {
        *counts.entry(row_key(row)).or_insert(0) += 1;
    }
    let mut leftover = Vec::new();
    for row in minuend {
        let key = row_key(&row);
        let count = counts.entry(key).or_insert(0);
        if *count > 0 {
            *count -= 1;
        } else {
            leftover.push(row);
        }
    }
    leftover
}

async fn records_for_commit(table: &Table, version: Version, filename: &str) -> DeltaResult<Vec<ChangeRecord>> {
    let log_root = format!("{}_delta_log/", table.table_path());
    let bytes = table.store().read(&format!("{log_root}{filename}")).await?;
    let actions = codec::parse_actions(&bytes)?;

    let mut operation = "WRITE".to_string();
    let mut commit_timestamp = 0i64;
    let mut old_rows = Vec::new();
    let mut new_rows = Vec::new();

    for action in &actions {
        match action {
            Action::CommitInfo(info) => {
                commit_timestamp = info.timestamp;
                if let Some(op) = &info.operation {
                    operation = op.clone();
                }
            }
            Action::Remove(r) if r.data_change => {
                let path = format!("{}{}", table.table_path(), r.path);
                if let Ok(bytes) = table.store().read(&path).await {
                    let mut rows = table.codec().decode(&bytes)?;
                    for row in &mut rows {
                        crate::partition::merge_partition_values(row, &r.partition_values);
                    }
                    old_rows.extend(rows);
                }
                // A removed file already vacuumed away can no longer be
                // diffed; its rows are silently absent from the feed rather
                // than erroring, matching the crate's gap-tolerance stance
                // (see `GapPolicy`) for history outside the retained log.
            }
            Action::Add(a) if a.data_change => {
                let path = format!("{}{}", table.table_path(), a.path);
                let bytes = table.store().read(&path).await?;
                let mut rows = table.codec().decode(&bytes)?;
                for row in &mut rows {
                    crate::partition::merge_partition_values(row, &a.partition_values);
                }
                new_rows.extend(rows);
            }
            _ => {}
        }
    }

    let records = if old_rows.is_empty() {
        new_rows
            .into_iter()
            .map(|row| ChangeRecord {
                change_type: ChangeType::Insert,
                commit_version: version,
                commit_timestamp,
                row,
            })
            .collect()
    } else {
        let old_only = multiset_difference(old_rows.clone(), &new_rows);
        let new_only = multiset_difference(new_rows, &old_rows);
        let (old_type, new_type) = match operation.as_str() {
            "UPDATE" => (ChangeType::UpdatePreimage, ChangeType::UpdatePostimage),
            _ => (ChangeType::Delete, ChangeType::Insert),
        };
        old_only
            .into_iter()
            .map(|row| ChangeRecord {
                change_type: old_type,
                commit_version: version,
                commit_timestamp,
                row,
            })
            .chain(new_only.into_iter().map(|row| ChangeRecord {
                change_type: new_type,
                commit_version: version,
                commit_timestamp,
                row,
            }))
            .collect()
    };
    Ok(records)
}

/// Change records for commits `start_version..=end_version`, in commit order
/// then row order within a commit (spec §4.10).
pub async fn changes_for_version_range(
    table: &Table,
    start_version: Version,
    end_version: Version,
) -> DeltaResult<Vec<ChangeRecord>> {
    let snapshot = table.snapshot_at(None).await?;
    if !snapshot.metadata.map(|m| m.enable_change_data_feed()).unwrap_or(false) {
        return Err(crate::error::Error::validation(
            "change data feed is not enabled on this table (set delta.enableChangeDataFeed)",
        ));
    }

    let log_root = format!("{}_delta_log/", table.table_path());
    let segment = LogSegment::discover(table.store(), &log_root, Some(end_version)).await?;

    let mut all = Vec::new();
    for commit in &segment.commits {
        if commit.version < start_version {
            continue;
        }
        all.extend(records_for_commit(table, commit.version, &commit.filename).await?);
    }
    Ok(all)
}

/// Resolves `start_millis..=end_millis` to the enclosing commit versions
/// (by `commitInfo.timestamp`) and delegates to
/// [`changes_for_version_range`].
pub async fn changes_for_timestamp_range(
    table: &Table,
    start_millis: i64,
    end_millis: i64,
) -> DeltaResult<Vec<ChangeRecord>> {
    let log_root = format!("{}_delta_log/", table.table_path());
    let segment = LogSegment::discover(table.store(), &log_root, None).await?;

    let mut start_version = None;
    let mut end_version = None;
    for commit in &segment.commits {
        let bytes = table.store().read(&format!("{log_root}{}", commit.filename)).await?;
        let timestamp = codec::parse_actions(&bytes)?.into_iter().find_map(|a| match a {
            Action::CommitInfo(info) => Some(info.timestamp),
            _ => None,
        });
        let Some(timestamp) = timestamp else { continue };
        if timestamp >= start_millis && start_version.is_none() {
            start_version = Some(commit.version);
        }
        if timestamp <= end_millis {
            end_version = Some(commit.version);
        }
    }

    match (start_version, end_version) {
        (Some(start), Some(end)) if start <= end => changes_for_version_range(table, start, end).await,
        _ => Ok(Vec::new()),
    }
}

/// Cursor for polling the feed forward. Holds only a version number, so a
/// subscriber can persist `next_version()` and resume after a restart.
pub struct ChangeFeedCursor {
    next_version: Version,
}

impl ChangeFeedCursor {
    pub fn from_version(version: Version) -> Self {
        ChangeFeedCursor { next_version: version }
    }

    pub fn next_version(&self) -> Version {
        self.next_version
    }

    /// Fetches every record committed since this cursor's position, up to
    /// the table's current version, and advances the cursor past it.
    pub async fn poll(&mut self, table: &Table) -> DeltaResult<Vec<ChangeRecord>> {
        let current = table.current_version().await?;
        if current < self.next_version {
            return Ok(Vec::new());
        }
        let records = changes_for_version_range(table, self.next_version, current).await?;
        self.next_version = current + 1;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ArrowParquetCodec;
    use crate::store::DefaultObjectStore;
    use crate::table::WriteOptions;
    use crate::value::Value;
    use object_store::memory::InMemory;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Arc;

    fn table() -> Table {
        let store: Arc<dyn crate::store::ObjectStoreAdapter> =
            Arc::new(DefaultObjectStore::new(Arc::new(InMemory::new())));
        let codec: Arc<dyn crate::codec::ColumnarCodec> = Arc::new(ArrowParquetCodec::new());
        Table::new(store, codec, "t")
    }

    fn row(id: &str, n: i64) -> Row {
        let mut r = Row::new();
        r.insert("id".to_string(), Value::Str(id.to_string()));
        r.insert("n".to_string(), Value::I64(n));
        r
    }

    async fn write_with_cdf(t: &Table, rows: Vec<Row>) -> Version {
        let mut config = StdHashMap::new();
        config.insert("delta.enableChangeDataFeed".to_string(), "true".to_string());
        let options = WriteOptions {
            table_configuration: Some(config),
            ..Default::default()
        };
        t.write(rows, options).await.unwrap()
    }

    #[tokio::test]
    async fn rejects_when_cdf_disabled() {
        let t = table();
        t.write(vec![row("1", 1)], WriteOptions::default()).await.unwrap();
        let err = changes_for_version_range(&t, 0, 0).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn write_then_delete_emits_insert_then_delete() {
        let t = table();
        write_with_cdf(&t, vec![row("1", 1), row("2", 2)]).await;
        let filter = crate::filter::parse(&serde_json::json!({"id": "1"})).unwrap();
        t.delete_where(filter).await.unwrap();

        let current = t.current_version().await.unwrap();
        let records = changes_for_version_range(&t, 0, current).await.unwrap();

        assert!(records.iter().any(|r| r.change_type == ChangeType::Insert && r.row.get("id") == Some(&Value::Str("1".into()))));
        assert!(records
            .iter()
            .any(|r| r.change_type == ChangeType::Delete && r.row.get("id") == Some(&Value::Str("1".into()))));
        assert!(!records
            .iter()
            .any(|r| r.change_type == ChangeType::Delete && r.row.get("id") == Some(&Value::Str("2".into()))));
    }

    #[tokio::test]
    async fn update_emits_preimage_and_postimage() {
        let t = table();
        write_with_cdf(&t, vec![row("1", 1)]).await;
        let filter = crate::filter::parse(&serde_json::json!({"id": "1"})).unwrap();
        let mut set = StdHashMap::new();
        set.insert("n".to_string(), Value::I64(99));
        t.update_where(filter, set).await.unwrap();

        let current = t.current_version().await.unwrap();
        let records = changes_for_version_range(&t, 0, current).await.unwrap();

        assert!(records
            .iter()
            .any(|r| r.change_type == ChangeType::UpdatePreimage && r.row.get("n") == Some(&Value::I64(1))));
        assert!(records
            .iter()
            .any(|r| r.change_type == ChangeType::UpdatePostimage && r.row.get("n") == Some(&Value::I64(99))));
    }

    #[tokio::test]
    async fn cursor_resumes_from_last_polled_version() {
        let t = table();
        write_with_cdf(&t, vec![row("1", 1)]).await;
        let mut cursor = ChangeFeedCursor::from_version(0);
        let first = cursor.poll(&t).await.unwrap();
        assert_eq!(first.len(), 1);

        write_with_cdf(&t, vec![row("2", 2)]).await;
        let second = cursor.poll(&t).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].row.get("id"), Some(&Value::Str("2".into())));
    }
}
