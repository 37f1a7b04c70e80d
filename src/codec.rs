//! The columnar codec adapter (spec §6, required external collaborator) and
//! checkpoint row encoding (spec §4.3). All higher layers are parameterized
//! over [`ColumnarCodec`]; the default implementation encodes with Arrow and
//! writes Parquet, the way the teacher's default engine does (teacher:
//! `arrow_compat.rs`, `engine/default`).

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch, StringArray};
use arrow_schema::{DataType as ArrowDataType, Field as ArrowField, Schema as ArrowSchema};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::statistics::Statistics;

use crate::error::{DeltaResult, Error};
use crate::schema::{DataType, StructType};
use crate::value::{value_to_json, Row, Value};

/// Per-row-group column statistics (spec §4.2 step 3 of §2, "zone maps"):
/// min/max/null-count per column.
#[derive(Debug, Clone, Default)]
pub struct ZoneMap {
    pub row_count: i64,
    pub min: HashMap<String, Value>,
    pub max: HashMap<String, Value>,
    pub null_count: HashMap<String, i64>,
}

/// One row of a checkpoint file: four optional string columns, each holding
/// a JSON-serialized action payload, unused columns empty per row (spec
/// §4.3).
#[derive(Debug, Clone, Default)]
pub struct CheckpointRow {
    pub add: Option<String>,
    pub remove: Option<String>,
    pub metadata: Option<String>,
    pub protocol: Option<String>,
}

/// Encodes a `(schema, columns)` tuple to a self-describing byte buffer and
/// decodes a buffer back to rows, with optional page metadata (spec §6).
pub trait ColumnarCodec: Send + Sync {
    fn encode(&self, schema: &StructType, rows: &[Row]) -> DeltaResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> DeltaResult<Vec<Row>>;
    fn decode_columns(&self, bytes: &[u8], columns: &[String]) -> DeltaResult<Vec<Row>> {
        // Default: decode everything and project. A codec that can skip
        // columns at the page level should override this for efficiency.
        let rows = self.decode(bytes)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .filter(|(k, _)| columns.contains(k))
                    .collect()
            })
            .collect())
    }
    /// Per-row-group zone maps, if the codec can expose them cheaply.
    fn row_group_stats(&self, _bytes: &[u8]) -> DeltaResult<Vec<ZoneMap>> {
        Ok(Vec::new())
    }
    /// Decode only the listed row groups (by index), after pruning has ruled
    /// the rest unreadable. The default decodes everything, which is always
    /// correct but skips nothing; a codec that can expose `row_group_stats`
    /// cheaply should override this too.
    fn decode_row_groups(&self, bytes: &[u8], _keep: &[usize]) -> DeltaResult<Vec<Row>> {
        self.decode(bytes)
    }

    fn encode_checkpoint(&self, rows: &[CheckpointRow]) -> DeltaResult<Vec<u8>>;
    fn decode_checkpoint(&self, bytes: &[u8]) -> DeltaResult<Vec<CheckpointRow>>;
}

/// Default codec: Arrow in memory, Parquet on disk.
pub struct ArrowParquetCodec;

impl ArrowParquetCodec {
    pub fn new() -> Self {
        ArrowParquetCodec
    }

    fn arrow_field(field: &crate::schema::StructField) -> ArrowField {
        ArrowField::new(
            field.physical_name(),
            to_arrow_type(&field.data_type),
            field.nullable,
        )
    }

    fn arrow_schema(schema: &StructType) -> ArrowSchema {
        ArrowSchema::new(schema.fields.iter().map(Self::arrow_field).collect::<Vec<_>>())
    }

    fn build_batch(&self, schema: &StructType, rows: &[Row]) -> DeltaResult<RecordBatch> {
        let arrow_schema = Arc::new(Self::arrow_schema(schema));
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields.len());
        for field in &schema.fields {
            columns.push(build_column(&field.data_type, field, rows)?);
        }
        RecordBatch::try_new(arrow_schema, columns)
            .map_err(|e| Error::Codec(format!("building record batch: {e}")))
    }
}

impl Default for ArrowParquetCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ColumnarCodec for ArrowParquetCodec {
    fn encode(&self, schema: &StructType, rows: &[Row]) -> DeltaResult<Vec<u8>> {
        let batch = self.build_batch(schema, rows)?;
        let mut buf = Vec::new();
        {
            let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), None)
                .map_err(|e| Error::Codec(format!("creating parquet writer: {e}")))?;
            writer
                .write(&batch)
                .map_err(|e| Error::Codec(format!("writing parquet batch: {e}")))?;
            writer
                .close()
                .map_err(|e| Error::Codec(format!("closing parquet writer: {e}")))?;
        }
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> DeltaResult<Vec<Row>> {
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes::Bytes::copy_from_slice(bytes))
            .map_err(|e| Error::Codec(format!("opening parquet file: {e}")))?
            .build()
            .map_err(|e| Error::Codec(format!("building parquet reader: {e}")))?;
        let mut rows = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| Error::Codec(format!("reading parquet batch: {e}")))?;
            rows.extend(record_batch_to_rows(&batch)?);
        }
        Ok(rows)
    }

    fn decode_row_groups(&self, bytes: &[u8], keep: &[usize]) -> DeltaResult<Vec<Row>> {
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes::Bytes::copy_from_slice(bytes))
            .map_err(|e| Error::Codec(format!("opening parquet file: {e}")))?
            .with_row_groups(keep.to_vec())
            .build()
            .map_err(|e| Error::Codec(format!("building parquet reader: {e}")))?;
        let mut rows = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| Error::Codec(format!("reading parquet batch: {e}")))?;
            rows.extend(record_batch_to_rows(&batch)?);
        }
        Ok(rows)
    }

    /// Reads min/max/null-count straight out of the Parquet footer (spec
    /// §4.6, P8) without decoding any row data, the way Parquet stores are
    /// meant to be pruned.
    fn row_group_stats(&self, bytes: &[u8]) -> DeltaResult<Vec<ZoneMap>> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes::Bytes::copy_from_slice(bytes))
            .map_err(|e| Error::Codec(format!("opening parquet file: {e}")))?;
        let metadata = builder.metadata();
        let mut zone_maps = Vec::with_capacity(metadata.row_groups().len());
        for rg in metadata.row_groups() {
            let mut zm = ZoneMap {
                row_count: rg.num_rows(),
                ..Default::default()
            };
            for col in rg.columns() {
                let name = col.column_descr().name().to_string();
                let Some(stats) = col.statistics() else {
                    continue;
                };
                if let Some(nc) = stats.null_count_opt() {
                    zm.null_count.insert(name.clone(), nc as i64);
                }
                if let Some((min, max)) = statistics_min_max(stats) {
                    zm.min.insert(name.clone(), min);
                    zm.max.insert(name, max);
                }
            }
            zone_maps.push(zm);
        }
        Ok(zone_maps)
    }

    fn encode_checkpoint(&self, rows: &[CheckpointRow]) -> DeltaResult<Vec<u8>> {
        let schema = Arc::new(ArrowSchema::new(vec![
            ArrowField::new("add", ArrowDataType::Utf8, true),
            ArrowField::new("remove", ArrowDataType::Utf8, true),
            ArrowField::new("metaData", ArrowDataType::Utf8, true),
            ArrowField::new("protocol", ArrowDataType::Utf8, true),
        ]));
        let add: ArrayRef = Arc::new(StringArray::from(
            rows.iter().map(|r| r.add.clone()).collect::<Vec<_>>(),
        ));
        let remove: ArrayRef = Arc::new(StringArray::from(
            rows.iter().map(|r| r.remove.clone()).collect::<Vec<_>>(),
        ));
        let metadata: ArrayRef = Arc::new(StringArray::from(
            rows.iter().map(|r| r.metadata.clone()).collect::<Vec<_>>(),
        ));
        let protocol: ArrayRef = Arc::new(StringArray::from(
            rows.iter().map(|r| r.protocol.clone()).collect::<Vec<_>>(),
        ));
        let batch = RecordBatch::try_new(schema, vec![add, remove, metadata, protocol])
            .map_err(|e| Error::Codec(format!("building checkpoint batch: {e}")))?;
        let mut buf = Vec::new();
        {
            let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), None)
                .map_err(|e| Error::Codec(format!("creating checkpoint writer: {e}")))?;
            writer
                .write(&batch)
                .map_err(|e| Error::Codec(format!("writing checkpoint batch: {e}")))?;
            writer
                .close()
                .map_err(|e| Error::Codec(format!("closing checkpoint writer: {e}")))?;
        }
        Ok(buf)
    }

    fn decode_checkpoint(&self, bytes: &[u8]) -> DeltaResult<Vec<CheckpointRow>> {
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes::Bytes::copy_from_slice(bytes))
            .map_err(|e| Error::Codec(format!("opening checkpoint file: {e}")))?
            .build()
            .map_err(|e| Error::Codec(format!("building checkpoint reader: {e}")))?;
        let mut rows = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| Error::Codec(format!("reading checkpoint batch: {e}")))?;
            let col = |name: &str| -> DeltaResult<Arc<StringArray>> {
                let idx = batch
                    .schema()
                    .index_of(name)
                    .map_err(|e| Error::Codec(e.to_string()))?;
                batch
                    .column(idx)
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .cloned()
                    .map(Arc::new)
                    .ok_or_else(|| Error::Codec(format!("column `{name}` is not utf8")))
            };
            let add_col = col("add")?;
            let remove_col = col("remove")?;
            let meta_col = col("metaData")?;
            let proto_col = col("protocol")?;
            for i in 0..batch.num_rows() {
                rows.push(CheckpointRow {
                    add: (!add_col.is_null(i)).then(|| add_col.value(i).to_string()),
                    remove: (!remove_col.is_null(i)).then(|| remove_col.value(i).to_string()),
                    metadata: (!meta_col.is_null(i)).then(|| meta_col.value(i).to_string()),
                    protocol: (!proto_col.is_null(i)).then(|| proto_col.value(i).to_string()),
                });
            }
        }
        Ok(rows)
    }
}

/// Pulls `(min, max)` out of a column chunk's Parquet statistics as
/// [`Value`]s, covering the physical types the default codec's own writer
/// produces (booleans, the fixed-width numerics, and UTF-8 strings). Decimal
/// and binary statistics are left unread; pruning just stays conservative
/// for those columns (spec §4.6, P8: never a false positive).
fn statistics_min_max(stats: &Statistics) -> Option<(Value, Value)> {
    match stats {
        Statistics::Boolean(s) => Some((Value::Bool(*s.min_opt()?), Value::Bool(*s.max_opt()?))),
        Statistics::Int32(s) => Some((Value::I32(*s.min_opt()?), Value::I32(*s.max_opt()?))),
        Statistics::Int64(s) => Some((Value::I64(*s.min_opt()?), Value::I64(*s.max_opt()?))),
        Statistics::Float(s) => Some((Value::F32(*s.min_opt()?), Value::F32(*s.max_opt()?))),
        Statistics::Double(s) => Some((Value::F64(*s.min_opt()?), Value::F64(*s.max_opt()?))),
        Statistics::ByteArray(s) => {
            let min = String::from_utf8_lossy(s.min_opt()?.as_bytes()).into_owned();
            let max = String::from_utf8_lossy(s.max_opt()?.as_bytes()).into_owned();
            Some((Value::Str(min), Value::Str(max)))
        }
        _ => None,
    }
}

fn to_arrow_type(dt: &DataType) -> ArrowDataType {
    match dt {
        DataType::Boolean => ArrowDataType::Boolean,
        DataType::Byte => ArrowDataType::Int8,
        DataType::Short => ArrowDataType::Int16,
        DataType::Integer => ArrowDataType::Int32,
        DataType::Long => ArrowDataType::Int64,
        DataType::Float => ArrowDataType::Float32,
        DataType::Double => ArrowDataType::Float64,
        DataType::Decimal(p, s) => ArrowDataType::Decimal128(*p, *s as i8),
        DataType::Date => ArrowDataType::Date32,
        DataType::Timestamp => ArrowDataType::Timestamp(arrow_schema::TimeUnit::Microsecond, Some("UTC".into())),
        DataType::TimestampNtz => ArrowDataType::Timestamp(arrow_schema::TimeUnit::Microsecond, None),
        DataType::String => ArrowDataType::Utf8,
        DataType::Binary => ArrowDataType::Binary,
        DataType::Variant => ArrowDataType::Utf8,
        DataType::Array(..) | DataType::Map(..) | DataType::Struct(..) => ArrowDataType::Utf8,
    }
}

/// Builds one Arrow column by pulling `field.name` out of every row,
/// encoding complex/variant types as their JSON string form (this engine's
/// default codec does not need native Arrow list/struct columns to satisfy
/// the spec's row-map data model).
fn build_column(data_type: &DataType, field: &crate::schema::StructField, rows: &[Row]) -> DeltaResult<ArrayRef> {
    use arrow::array::*;
    macro_rules! numeric_column {
        ($builder:ty, $variant:ident, $cast:ty) => {{
            let mut builder = <$builder>::with_capacity(rows.len());
            for row in rows {
                match row.get(&field.name) {
                    Some(Value::$variant(v)) => builder.append_value(*v as $cast),
                    Some(Value::Null) | None => builder.append_null(),
                    Some(other) => {
                        return Err(Error::SchemaIncompatible(format!(
                            "field `{}` expected {:?}, found {other:?}",
                            field.name, data_type
                        )))
                    }
                }
            }
            Arc::new(builder.finish()) as ArrayRef
        }};
    }
    Ok(match data_type {
        DataType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(rows.len());
            for row in rows {
                match row.get(&field.name) {
                    Some(Value::Bool(b)) => builder.append_value(*b),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Integer => numeric_column!(Int32Builder, I32, i32),
        DataType::Long => numeric_column!(Int64Builder, I64, i64),
        DataType::Float => numeric_column!(Float32Builder, F32, f32),
        DataType::Double => numeric_column!(Float64Builder, F64, f64),
        DataType::Binary => {
            let mut builder = BinaryBuilder::with_capacity(rows.len(), 0);
            for row in rows {
                match row.get(&field.name) {
                    Some(Value::Bytes(b)) => builder.append_value(b),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        _ => {
            // string, variant, timestamp-as-string, decimal-as-string and
            // any other atom the minimal default codec does not need a
            // native Arrow representation for.
            let mut builder = StringBuilder::with_capacity(rows.len(), 0);
            for row in rows {
                match row.get(&field.name) {
                    Some(Value::Null) | None => builder.append_null(),
                    Some(v) => builder.append_value(value_display(v)),
                }
            }
            Arc::new(builder.finish())
        }
    })
}

fn value_display(v: &Value) -> String {
    match v {
        Value::Str(s) => s.clone(),
        Value::Instant(t) => t.to_rfc3339(),
        Value::Variant(j) => j.to_string(),
        other => value_to_json(other).to_string(),
    }
}

fn record_batch_to_rows(batch: &RecordBatch) -> DeltaResult<Vec<Row>> {
    use arrow::array::*;
    let schema = batch.schema();
    let mut rows: Vec<Row> = (0..batch.num_rows()).map(|_| Row::new()).collect();

    for (col_idx, field) in schema.fields().iter().enumerate() {
        let col = batch.column(col_idx);
        for (row_idx, row) in rows.iter_mut().enumerate() {
            if col.is_null(row_idx) {
                row.insert(field.name().clone(), Value::Null);
                continue;
            }
            let value = match col.data_type() {
                ArrowDataType::Boolean => {
                    Value::Bool(col.as_any().downcast_ref::<BooleanArray>().unwrap().value(row_idx))
                }
                ArrowDataType::Int32 => {
                    Value::I32(col.as_any().downcast_ref::<Int32Array>().unwrap().value(row_idx))
                }
                ArrowDataType::Int64 => {
                    Value::I64(col.as_any().downcast_ref::<Int64Array>().unwrap().value(row_idx))
                }
                ArrowDataType::Float32 => {
                    Value::F32(col.as_any().downcast_ref::<Float32Array>().unwrap().value(row_idx))
                }
                ArrowDataType::Float64 => {
                    Value::F64(col.as_any().downcast_ref::<Float64Array>().unwrap().value(row_idx))
                }
                ArrowDataType::Binary => Value::Bytes(
                    col.as_any().downcast_ref::<BinaryArray>().unwrap().value(row_idx).to_vec(),
                ),
                ArrowDataType::Utf8 => {
                    let s = col.as_any().downcast_ref::<StringArray>().unwrap().value(row_idx);
                    Value::Str(s.to_string())
                }
                other => {
                    return Err(Error::Codec(format!("unsupported arrow column type {other:?}")))
                }
            };
            row.insert(field.name().clone(), value);
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StructField;

    #[test]
    fn round_trips_rows_through_parquet() {
        let schema = StructType::new([
            StructField::new("id", DataType::String, false),
            StructField::new("n", DataType::Long, true),
        ]);
        let mut row1 = Row::new();
        row1.insert("id".to_string(), Value::Str("1".to_string()));
        row1.insert("n".to_string(), Value::I64(10));
        let mut row2 = Row::new();
        row2.insert("id".to_string(), Value::Str("2".to_string()));
        row2.insert("n".to_string(), Value::Null);

        let codec = ArrowParquetCodec::new();
        let bytes = codec.encode(&schema, &[row1, row2]).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].get("id"), Some(&Value::Str("1".to_string())));
        assert_eq!(decoded[1].get("n"), Some(&Value::Null));
    }

    #[test]
    fn checkpoint_rows_round_trip() {
        let codec = ArrowParquetCodec::new();
        let rows = vec![
            CheckpointRow {
                add: Some("{\"path\":\"a\"}".to_string()),
                ..Default::default()
            },
            CheckpointRow {
                protocol: Some("{\"minReaderVersion\":1}".to_string()),
                ..Default::default()
            },
        ];
        let bytes = codec.encode_checkpoint(&rows).unwrap();
        let decoded = codec.decode_checkpoint(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].add.as_deref(), Some("{\"path\":\"a\"}"));
        assert_eq!(decoded[1].protocol.as_deref(), Some("{\"minReaderVersion\":1}"));
    }

    #[test]
    fn row_group_stats_reports_min_max_and_null_count() {
        let schema = StructType::new([
            StructField::new("id", DataType::String, false),
            StructField::new("n", DataType::Long, true),
        ]);
        let rows: Vec<Row> = (0..5)
            .map(|i| {
                let mut r = Row::new();
                r.insert("id".to_string(), Value::Str(i.to_string()));
                r.insert(
                    "n".to_string(),
                    if i == 2 { Value::Null } else { Value::I64(i) },
                );
                r
            })
            .collect();

        let codec = ArrowParquetCodec::new();
        let bytes = codec.encode(&schema, &rows).unwrap();
        let zone_maps = codec.row_group_stats(&bytes).unwrap();
        assert_eq!(zone_maps.len(), 1);
        let zm = &zone_maps[0];
        assert_eq!(zm.row_count, 5);
        assert_eq!(zm.min.get("n"), Some(&Value::I64(0)));
        assert_eq!(zm.max.get("n"), Some(&Value::I64(4)));
        assert_eq!(zm.null_count.get("n"), Some(&1));
    }

    #[test]
    fn decode_row_groups_restricts_to_kept_indices() {
        let schema = StructType::new([StructField::new("n", DataType::Long, false)]);
        let rows: Vec<Row> = (0..3)
            .map(|i| {
                let mut r = Row::new();
                r.insert("n".to_string(), Value::I64(i));
                r
            })
            .collect();
        let codec = ArrowParquetCodec::new();
        let bytes = codec.encode(&schema, &rows).unwrap();
        let decoded = codec.decode_row_groups(&bytes, &[0]).unwrap();
        assert_eq!(decoded.len(), 3); // a single-row-group file keeps all rows
    }
}
