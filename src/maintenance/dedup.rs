//! Deduplication: collapses rows sharing a key (or an entire row) down to one
//! survivor per key, as a single `remove`+`add` commit (spec §4.9, P6).

use std::collections::HashMap;

use tracing::info;

use crate::actions::{Action, Add, CommitInfo, Remove};
use crate::error::{DeltaResult, Error};
use crate::table::Table;
use crate::value::{value_to_json, Row, Value};
use crate::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepStrategy {
    First,
    Last,
    Latest,
}

impl Default for KeepStrategy {
    fn default() -> Self {
        KeepStrategy::First
    }
}

#[derive(Debug, Clone, Default)]
pub struct DedupOptions {
    pub primary_key: Option<Vec<String>>,
    pub keep_strategy: KeepStrategy,
    pub order_by_column: Option<String>,
    pub exact_duplicates: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DedupMetrics {
    pub rows_scanned: u64,
    pub rows_removed: u64,
    pub files_touched: u64,
    pub version: Option<Version>,
}

/// `null` components compare equal to each other within a key (spec §4.9):
/// every `Value::Null` serializes to the same JSON literal, so the default
/// canonicalization already satisfies this without special-casing.
fn row_key(row: &Row, columns: &[String]) -> String {
    let mut parts = Vec::with_capacity(columns.len());
    for col in columns {
        let v = row.get(col).cloned().unwrap_or(Value::Null);
        parts.push(value_to_json(&v).to_string());
    }
    parts.join("\u{1}")
}

fn whole_row_key(row: &Row) -> String {
    let mut pairs: Vec<(&String, String)> = row.iter().map(|(k, v)| (k, value_to_json(v).to_string())).collect();
    pairs.sort();
    pairs.into_iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("\u{1}")
}

pub async fn dedup(table: &Table, options: DedupOptions) -> DeltaResult<DedupMetrics> {
    if !options.exact_duplicates && options.primary_key.is_none() {
        return Err(Error::validation("dedup requires primaryKey unless exactDuplicates is set"));
    }
    if options.keep_strategy == KeepStrategy::Latest && options.order_by_column.is_none() {
        return Err(Error::validation("keepStrategy=latest requires orderByColumn"));
    }

    let snapshot = table.snapshot_at(None).await?;
    let Some(metadata) = snapshot.metadata.clone() else {
        return Err(Error::validation("cannot dedup a table with no metadata"));
    };
    let schema = metadata.schema()?;

    // Flatten to (file_index, row) in scan order: file order, then row order
    // within each file's decoded batch.
    let mut flattened: Vec<(usize, Row)> = Vec::new();
    for (file_idx, file) in snapshot.files.iter().enumerate() {
        let bytes = table
            .store()
            .read(&format!("{}{}", table.table_path(), file.path))
            .await?;
        for row in table.codec().decode(&bytes)? {
            flattened.push((file_idx, row));
        }
    }
    let mut metrics = DedupMetrics {
        rows_scanned: flattened.len() as u64,
        ..Default::default()
    };

    // key -> winning global index.
    let mut winners: HashMap<String, usize> = HashMap::new();
    let mut best_order_value: HashMap<String, Value> = HashMap::new();

    for (idx, (_, row)) in flattened.iter().enumerate() {
        let key = if options.exact_duplicates {
            whole_row_key(row)
        } else {
            row_key(row, options.primary_key.as_deref().unwrap_or(&[]))
        };

        match options.keep_strategy {
            KeepStrategy::First => {
                winners.entry(key).or_insert(idx);
            }
            KeepStrategy::Last => {
                winners.insert(key, idx);
            }
            KeepStrategy::Latest => {
                let col = options.order_by_column.as_ref().unwrap();
                let candidate = row.get(col).cloned().unwrap_or(Value::Null);
                match best_order_value.get(&key) {
                    Some(current_best) if candidate.partial_cmp(current_best) != Some(std::cmp::Ordering::Greater) => {}
                    _ => {
                        best_order_value.insert(key.clone(), candidate);
                        winners.insert(key, idx);
                    }
                }
            }
        }
    }
    let winner_indices: std::collections::HashSet<usize> = winners.values().copied().collect();
    metrics.rows_removed = (flattened.len() - winner_indices.len()) as u64;

    if metrics.rows_removed == 0 || options.dry_run {
        return Ok(metrics);
    }

    // Bucket surviving rows and touched-file removes by originating partition.
    let mut touched_files: std::collections::HashSet<usize> = std::collections::HashSet::new();
    for (idx, (file_idx, _)) in flattened.iter().enumerate() {
        if !winner_indices.contains(&idx) {
            touched_files.insert(*file_idx);
        }
    }
    metrics.files_touched = touched_files.len() as u64;

    let mut survivors_by_file: HashMap<usize, Vec<Row>> = HashMap::new();
    for (idx, (file_idx, row)) in flattened.into_iter().enumerate() {
        if touched_files.contains(&file_idx) && winner_indices.contains(&idx) {
            survivors_by_file.entry(file_idx).or_default().push(row);
        }
    }

    let now = super::now_millis();
    let mut removes = Vec::new();
    let mut new_adds = Vec::new();
    let mut staged_paths = Vec::new();

    let result: DeltaResult<()> = async {
        for file_idx in &touched_files {
            let file = &snapshot.files[*file_idx];
            removes.push(Remove {
                path: file.path.clone(),
                deletion_timestamp: now,
                data_change: true,
                partition_values: file.partition_values.clone(),
                size: Some(file.size),
                deletion_vector: None,
            });

            let Some(rows) = survivors_by_file.get(file_idx) else { continue };
            let file_schema = crate::schema::StructType {
                fields: schema
                    .fields
                    .iter()
                    .filter(|f| !metadata.partition_columns.contains(&f.name))
                    .cloned()
                    .collect(),
            };
            let bytes = table.codec().encode(&file_schema, rows)?;
            let new_path = format!("part-dedup-{}.parquet", uuid::Uuid::new_v4());
            let full_path = format!("{}{new_path}", table.table_path());
            table.store().write(&full_path, bytes.clone().into()).await?;
            staged_paths.push(full_path);
            new_adds.push(Add {
                path: new_path,
                partition_values: file.partition_values.clone(),
                size: bytes.len() as i64,
                modification_time: now,
                data_change: true,
                stats: None,
                deletion_vector: None,
                tags: None,
            });
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        for path in &staged_paths {
            let _ = table.store().delete(path).await;
        }
        return Err(e);
    }

    let mut actions: Vec<Action> = removes.into_iter().map(Action::Remove).collect();
    actions.extend(new_adds.into_iter().map(Action::Add));
    actions.push(Action::CommitInfo(CommitInfo::new(now, "DEDUP", None)));

    match table.commit_actions(actions).await {
        Ok(version) => {
            metrics.version = Some(version);
            info!(version, removed = metrics.rows_removed, "dedup complete");
            Ok(metrics)
        }
        Err(e) => {
            for path in &staged_paths {
                let _ = table.store().delete(path).await;
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ArrowParquetCodec;
    use crate::store::DefaultObjectStore;
    use crate::table::WriteOptions;
    use object_store::memory::InMemory;
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

    #[tokio::test]
    async fn keeps_first_occurrence_by_primary_key() {
        let t = table();
        t.write(vec![row("1", 1), row("1", 2)], WriteOptions::default()).await.unwrap();

        let options = DedupOptions {
            primary_key: Some(vec!["id".to_string()]),
            keep_strategy: KeepStrategy::First,
            ..Default::default()
        };
        let metrics = dedup(&t, options).await.unwrap();
        assert_eq!(metrics.rows_removed, 1);

        let rows = t.query(None, crate::table::QueryOptions::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("n"), Some(&Value::I64(1)));
    }

    #[tokio::test]
    async fn latest_keeps_greatest_order_by_value() {
        let t = table();
        t.write(vec![row("1", 1), row("1", 5), row("1", 3)], WriteOptions::default())
            .await
            .unwrap();

        let options = DedupOptions {
            primary_key: Some(vec!["id".to_string()]),
            keep_strategy: KeepStrategy::Latest,
            order_by_column: Some("n".to_string()),
            ..Default::default()
        };
        dedup(&t, options).await.unwrap();

        let rows = t.query(None, crate::table::QueryOptions::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("n"), Some(&Value::I64(5)));
    }
}
