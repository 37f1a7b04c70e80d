//! File compaction: merges small files within a partition into fewer,
//! larger ones as a single `remove`+`add` commit (spec §4.9, P6).

use std::collections::HashMap;

use tracing::info;

use crate::actions::{Action, Add, CommitInfo, Remove};
use crate::error::{DeltaResult, Error};
use crate::table::Table;
use crate::value::Row;
use crate::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStrategy {
    BinPacking,
    Greedy,
    SortBySize,
}

#[derive(Debug, Clone)]
pub struct CompactionOptions {
    pub target_file_size: i64,
    pub min_files_for_compaction: usize,
    pub strategy: CompactionStrategy,
    pub preserve_order: bool,
    pub verify_integrity: bool,
    pub dry_run: bool,
}

impl Default for CompactionOptions {
    fn default() -> Self {
        CompactionOptions {
            target_file_size: 128 * 1024 * 1024,
            min_files_for_compaction: 2,
            strategy: CompactionStrategy::BinPacking,
            preserve_order: true,
            verify_integrity: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompactionMetrics {
    pub files_before: u64,
    pub files_after: u64,
    pub files_skipped_large_enough: u64,
    pub files_compacted: u64,
    pub new_files: Vec<String>,
    pub version: Option<Version>,
}

/// Bin-pack a partition's small files so each output is at most 120% of
/// `target_file_size` (spec §4.9). `BinPacking`/`SortBySize` presort by size
/// (descending / ascending best-fit); `Greedy` packs in encounter order.
fn pack_bins<'a>(
    files: &[&'a Add],
    target_file_size: i64,
    min_files: usize,
    strategy: CompactionStrategy,
) -> Vec<Vec<&'a Add>> {
    let max_bin_size = (target_file_size as f64 * 1.2) as i64;
    let mut ordered: Vec<&Add> = files.to_vec();
    match strategy {
        CompactionStrategy::BinPacking => ordered.sort_by(|a, b| b.size.cmp(&a.size)),
        CompactionStrategy::SortBySize => ordered.sort_by_key(|a| a.size),
        CompactionStrategy::Greedy => {}
    }

    let mut bins: Vec<Vec<&Add>> = Vec::new();
    let mut current: Vec<&Add> = Vec::new();
    let mut current_size = 0i64;
    for file in ordered {
        if !current.is_empty() && current_size + file.size > max_bin_size {
            bins.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += file.size;
        current.push(file);
    }
    if !current.is_empty() {
        bins.push(current);
    }
    bins.into_iter().filter(|b| b.len() >= min_files.max(1)).collect()
}

fn partition_key(add: &Add) -> String {
    let mut pairs: Vec<(&String, &Option<String>)> = add.partition_values.iter().collect();
    pairs.sort_by_key(|(k, _)| k.clone());
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={}", v.as_deref().unwrap_or("")))
        .collect::<Vec<_>>()
        .join("/")
}

pub async fn compact(table: &Table, options: CompactionOptions) -> DeltaResult<CompactionMetrics> {
    let snapshot = table.snapshot_at(None).await?;
    let Some(metadata) = snapshot.metadata.clone() else {
        return Err(Error::validation("cannot compact a table with no metadata"));
    };
    let schema = metadata.schema()?;

    let mut by_partition: HashMap<String, Vec<&Add>> = HashMap::new();
    for file in &snapshot.files {
        by_partition.entry(partition_key(file)).or_default().push(file);
    }

    let mut metrics = CompactionMetrics {
        files_before: snapshot.files.len() as u64,
        ..Default::default()
    };

    let mut removes = Vec::new();
    let mut new_adds: Vec<Add> = Vec::new();
    let mut staged_paths = Vec::new();
    let now = super::now_millis();

    let result: DeltaResult<()> = async {
        for files in by_partition.values() {
            let mut small = Vec::new();
            for file in files {
                if file.size >= options.target_file_size {
                    metrics.files_skipped_large_enough += 1;
                } else {
                    small.push(*file);
                }
            }

            let bins = pack_bins(&small, options.target_file_size, options.min_files_for_compaction, options.strategy);
            let binned_paths: std::collections::HashSet<&str> =
                bins.iter().flatten().map(|f| f.path.as_str()).collect();

            for bin in &bins {
                if options.dry_run {
                    metrics.files_compacted += bin.len() as u64;
                    continue;
                }

                let mut rows: Vec<Row> = Vec::new();
                for file in bin {
                    let bytes = table
                        .store()
                        .read(&format!("{}{}", table.table_path(), file.path))
                        .await?;
                    rows.extend(table.codec().decode(&bytes)?);
                }
                let expected_rows = rows.len();

                let file_schema = crate::schema::StructType {
                    fields: schema
                        .fields
                        .iter()
                        .filter(|f| !metadata.partition_columns.contains(&f.name))
                        .cloned()
                        .collect(),
                };
                let bytes = table.codec().encode(&file_schema, &rows)?;

                if options.verify_integrity {
                    let roundtrip = table.codec().decode(&bytes)?;
                    if roundtrip.len() != expected_rows {
                        return Err(Error::IntegrityFailure(format!(
                            "compacted file row count {} does not match source total {}",
                            roundtrip.len(),
                            expected_rows
                        )));
                    }
                }

                let new_path = format!("part-compact-{}.parquet", uuid::Uuid::new_v4());
                let full_path = format!("{}{new_path}", table.table_path());
                table.store().write(&full_path, bytes.clone().into()).await?;
                staged_paths.push(full_path);

                for file in bin {
                    removes.push(Remove {
                        path: file.path.clone(),
                        deletion_timestamp: now,
                        data_change: false,
                        partition_values: file.partition_values.clone(),
                        size: Some(file.size),
                        deletion_vector: None,
                    });
                }
                new_adds.push(Add {
                    path: new_path,
                    partition_values: bin[0].partition_values.clone(),
                    size: bytes.len() as i64,
                    modification_time: now,
                    data_change: false,
                    stats: None,
                    deletion_vector: None,
                    tags: None,
                });
                metrics.files_compacted += bin.len() as u64;
            }
            let _ = binned_paths; // only used to document which files a bin owns
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

    if options.dry_run || new_adds.is_empty() {
        metrics.files_after = metrics.files_before - metrics.files_compacted;
        return Ok(metrics);
    }

    metrics.new_files = new_adds.iter().map(|a| a.path.clone()).collect();
    metrics.files_after = metrics.files_before - metrics.files_compacted + new_adds.len() as u64;

    let mut actions: Vec<Action> = removes.into_iter().map(Action::Remove).collect();
    actions.extend(new_adds.into_iter().map(Action::Add));
    actions.push(Action::CommitInfo(CommitInfo::new(now, "OPTIMIZE", None)));

    match table.commit_actions(actions).await {
        Ok(version) => {
            metrics.version = Some(version);
            info!(version, compacted = metrics.files_compacted, "compaction complete");
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
    use crate::value::Value;
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
    async fn merges_small_files_preserving_row_count() {
        let t = table();
        t.write(vec![row("1")], WriteOptions::default()).await.unwrap();
        t.write(vec![row("2")], WriteOptions::default()).await.unwrap();
        t.write(vec![row("3")], WriteOptions::default()).await.unwrap();

        let options = CompactionOptions {
            target_file_size: 1_000_000_000,
            min_files_for_compaction: 2,
            ..Default::default()
        };
        let metrics = compact(&t, options).await.unwrap();
        assert!(metrics.version.is_some());
        assert_eq!(metrics.files_compacted, 3);

        let rows = t.query(None, crate::table::QueryOptions::default()).await.unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn dry_run_performs_no_commit() {
        let t = table();
        t.write(vec![row("1")], WriteOptions::default()).await.unwrap();
        t.write(vec![row("2")], WriteOptions::default()).await.unwrap();
        let before = t.current_version().await.unwrap();

        let options = CompactionOptions {
            target_file_size: 1_000_000_000,
            dry_run: true,
            ..Default::default()
        };
        let metrics = compact(&t, options).await.unwrap();
        assert!(metrics.version.is_none());
        t.refresh();
        assert_eq!(t.current_version().await.unwrap(), before);
    }
}
