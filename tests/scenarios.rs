//! End-to-end scenarios exercised through the public `Table` API, rather
//! than a single module's internals (spec §8: S1-S6, P1-P9).

use std::collections::HashMap;
use std::sync::Arc;

use delta_core::codec::ArrowParquetCodec;
use delta_core::filter::{Filter, FieldOp};
use delta_core::maintenance::{compact, dedup, vacuum, CompactionOptions, DedupOptions, KeepStrategy, VacuumOptions};
use delta_core::store::DefaultObjectStore;
use delta_core::table::{QueryOptions, WriteOptions};
use delta_core::value::Value;
use delta_core::{Row, Table};
use object_store::memory::InMemory;

fn in_memory_table(path: &str) -> Table {
    let store: Arc<dyn delta_core::store::ObjectStoreAdapter> =
        Arc::new(DefaultObjectStore::new(Arc::new(InMemory::new())));
    let codec: Arc<dyn delta_core::codec::ColumnarCodec> = Arc::new(ArrowParquetCodec::new());
    Table::new(store, codec, path)
}

fn row(fields: &[(&str, Value)]) -> Row {
    fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// S3 — two tasks each read version 0 and each try to commit version 1;
/// exactly one succeeds, the other raises `ConcurrencyConflict`.
#[tokio::test]
async fn s3_concurrent_writers_one_wins_one_conflicts() {
    let store: Arc<dyn delta_core::store::ObjectStoreAdapter> =
        Arc::new(DefaultObjectStore::new(Arc::new(InMemory::new())));
    let codec: Arc<dyn delta_core::codec::ColumnarCodec> = Arc::new(ArrowParquetCodec::new());
    let t1 = Table::new(store.clone(), codec.clone(), "t");
    let t2 = Table::new(store, codec, "t");

    t1.write(vec![row(&[("id", Value::Str("0".into()))])], WriteOptions::default())
        .await
        .unwrap();

    // Both tables observe version 0 before either commits version 1.
    t1.current_version().await.unwrap();
    t2.current_version().await.unwrap();

    let a = t1.write(vec![row(&[("id", Value::Str("a".into()))])], WriteOptions::default());
    let b = t2.write(vec![row(&[("id", Value::Str("b".into()))])], WriteOptions::default());
    let (ra, rb) = tokio::join!(a, b);

    let results = [ra, rb];
    let ok_count = results.iter().filter(|r| r.is_ok()).count();
    let conflict_count = results
        .iter()
        .filter(|r| matches!(r, Err(delta_core::Error::ConcurrencyConflict { .. })))
        .count();
    assert_eq!(ok_count, 1);
    assert_eq!(conflict_count, 1);
}

/// S4 — partition pruning: a query over a subset of partition values reads
/// only the files whose partition values match.
#[tokio::test]
async fn s4_partition_pruning_reads_only_matching_files() {
    let t = in_memory_table("t");
    let mut rows = Vec::new();
    for year in [2023, 2024] {
        for month in 1..=3 {
            rows.push(row(&[
                ("year", Value::I64(year)),
                ("month", Value::I64(month)),
                ("v", Value::Str(format!("{year}-{month}"))),
            ]));
        }
    }
    let options = WriteOptions {
        partition_columns: Some(vec!["year".to_string(), "month".to_string()]),
        ..Default::default()
    };
    t.write(rows, options).await.unwrap();

    let filter = Filter::And(vec![
        Filter::Field("year".to_string(), FieldOp::Eq(Value::I64(2024))),
        Filter::Field("month".to_string(), FieldOp::In(vec![Value::I64(1), Value::I64(2)])),
    ]);
    let result = t.query(Some(filter), QueryOptions::default()).await.unwrap();
    assert_eq!(result.len(), 2);
    for r in &result {
        assert_eq!(r.get("year"), Some(&Value::I64(2024)));
    }
}

/// Full maintenance lifecycle: write several small files, compact them,
/// dedup a repeated key, vacuum the resulting tombstones, and confirm the
/// final row set matches what survives each step (P6).
#[tokio::test]
async fn full_maintenance_lifecycle_preserves_surviving_rows() {
    let t = in_memory_table("t");
    t.write(vec![row(&[("id", Value::Str("1".into())), ("n", Value::I64(1))])], WriteOptions::default())
        .await
        .unwrap();
    t.write(vec![row(&[("id", Value::Str("2".into())), ("n", Value::I64(2))])], WriteOptions::default())
        .await
        .unwrap();
    t.write(vec![row(&[("id", Value::Str("1".into())), ("n", Value::I64(99))])], WriteOptions::default())
        .await
        .unwrap();

    let compaction = compact(
        &t,
        CompactionOptions {
            target_file_size: 1_000_000_000,
            min_files_for_compaction: 2,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(compaction.version.is_some());

    let rows_after_compaction = t.query(None, QueryOptions::default()).await.unwrap();
    assert_eq!(rows_after_compaction.len(), 3);

    let dedup_metrics = dedup(
        &t,
        DedupOptions {
            primary_key: Some(vec!["id".to_string()]),
            keep_strategy: KeepStrategy::Last,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(dedup_metrics.rows_removed, 1);

    let rows_after_dedup = t.query(None, QueryOptions::default()).await.unwrap();
    assert_eq!(rows_after_dedup.len(), 2);
    let one = rows_after_dedup.iter().find(|r| r.get("id") == Some(&Value::Str("1".into()))).unwrap();
    assert_eq!(one.get("n"), Some(&Value::I64(99)));

    let now = 2_000_000_000_000i64;
    let immediate = vacuum(&t, VacuumOptions { retention_hours: 168, dry_run: false }, now).await.unwrap();
    assert_eq!(immediate.files_deleted, 0);

    let later = vacuum(
        &t,
        VacuumOptions { retention_hours: 168, dry_run: false },
        now + 169 * 3_600_000,
    )
    .await
    .unwrap();
    assert!(later.files_deleted > 0);

    let final_rows = t.query(None, QueryOptions::default()).await.unwrap();
    assert_eq!(final_rows.len(), 2);
}

/// P4/S2 — a schema-incompatible second write is rejected without
/// corrupting the table; a subsequent compatible write still succeeds.
#[tokio::test]
async fn incompatible_write_is_rejected_then_table_still_usable() {
    let t = in_memory_table("t");
    t.write(vec![row(&[("id", Value::Str("1".into()))])], WriteOptions::default())
        .await
        .unwrap();

    let mut bad_row = HashMap::new();
    bad_row.insert("id".to_string(), Value::I64(1));
    let err = t.write(vec![bad_row], WriteOptions::default()).await;
    assert!(err.is_err());

    t.write(vec![row(&[("id", Value::Str("2".into()))])], WriteOptions::default())
        .await
        .unwrap();
    let rows = t.query(None, QueryOptions::default()).await.unwrap();
    assert_eq!(rows.len(), 2);
}
