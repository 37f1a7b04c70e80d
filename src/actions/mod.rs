//! The transaction log action sum type (spec §3). Actions are a closed
//! tagged union (`add | remove | metaData | protocol | commitInfo`),
//! serialized as one single-key JSON object per line (Design Notes, "Sum of
//! actions").

pub mod deletion_vector;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{DeltaResult, Error};
use crate::schema::{schema_from_json, StructType};

pub use deletion_vector::DeletionVectorDescriptor;

/// Per-file column statistics (spec §3, `FileStats`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    #[serde(rename = "numRecords")]
    pub num_records: i64,
    #[serde(rename = "minValues", default)]
    pub min_values: HashMap<String, Json>,
    #[serde(rename = "maxValues", default)]
    pub max_values: HashMap<String, Json>,
    #[serde(rename = "nullCount", default)]
    pub null_count: HashMap<String, i64>,
}

impl FileStats {
    pub fn validate(&self) -> DeltaResult<()> {
        if self.num_records < 0 {
            return Err(Error::malformed("FileStats.numRecords must be >= 0"));
        }
        for (col, count) in &self.null_count {
            if *count < 0 || *count > self.num_records {
                return Err(Error::malformed(format!(
                    "FileStats.nullCount[{col}] = {count} out of range for numRecords = {}",
                    self.num_records
                )));
            }
        }
        Ok(())
    }

    pub fn parse(s: &str) -> DeltaResult<FileStats> {
        let stats: FileStats = serde_json::from_str(s)?;
        stats.validate()?;
        Ok(stats)
    }
}

/// Declares a file as part of the table state (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Add {
    pub path: String,
    #[serde(rename = "partitionValues", default)]
    pub partition_values: HashMap<String, Option<String>>,
    pub size: i64,
    #[serde(rename = "modificationTime")]
    pub modification_time: i64,
    #[serde(rename = "dataChange")]
    pub data_change: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
    #[serde(rename = "deletionVector", default, skip_serializing_if = "Option::is_none")]
    pub deletion_vector: Option<DeletionVectorDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,
}

impl Add {
    pub fn validate(&self) -> DeltaResult<()> {
        validate_relative_path(&self.path)?;
        if self.size < 0 {
            return Err(Error::malformed("add.size must be >= 0"));
        }
        if self.modification_time < 0 {
            return Err(Error::malformed("add.modificationTime must be >= 0"));
        }
        if let Some(stats) = &self.stats {
            FileStats::parse(stats)?;
        }
        Ok(())
    }

    pub fn parsed_stats(&self) -> DeltaResult<Option<FileStats>> {
        self.stats.as_deref().map(FileStats::parse).transpose()
    }
}

/// Retracts a previously added file (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remove {
    pub path: String,
    #[serde(rename = "deletionTimestamp")]
    pub deletion_timestamp: i64,
    #[serde(rename = "dataChange")]
    pub data_change: bool,
    #[serde(rename = "partitionValues", default)]
    pub partition_values: HashMap<String, Option<String>>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(rename = "deletionVector", default, skip_serializing_if = "Option::is_none")]
    pub deletion_vector: Option<DeletionVectorDescriptor>,
}

impl Remove {
    pub fn validate(&self) -> DeltaResult<()> {
        validate_relative_path(&self.path)?;
        if self.deletion_timestamp < 0 {
            return Err(Error::malformed("remove.deletionTimestamp must be >= 0"));
        }
        Ok(())
    }
}

/// The on-wire file format descriptor nested inside `metaData` (kept
/// minimal: only `provider` is load-bearing for this engine).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Format {
    pub provider: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

/// Defines or redefines table metadata (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub format: Format,
    #[serde(rename = "schemaString")]
    pub schema_string: String,
    #[serde(rename = "partitionColumns", default)]
    pub partition_columns: Vec<String>,
    #[serde(default)]
    pub configuration: HashMap<String, String>,
    #[serde(rename = "createdTime", default)]
    pub created_time: Option<i64>,
}

impl Metadata {
    pub fn validate(&self) -> DeltaResult<()> {
        if self.id.trim().is_empty() {
            return Err(Error::malformed("metaData.id must be a non-empty stable id"));
        }
        if self.format.provider.trim().is_empty() {
            return Err(Error::malformed("metaData.format.provider must be set"));
        }
        self.schema()?;
        Ok(())
    }

    /// Parse and validate `schemaString` per invariant I5.
    pub fn schema(&self) -> DeltaResult<StructType> {
        let json: Json = serde_json::from_str(&self.schema_string)?;
        schema_from_json(&json)
    }

    pub fn enable_change_data_feed(&self) -> bool {
        self.configuration
            .get("delta.enableChangeDataFeed")
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    pub fn append_only(&self) -> bool {
        self.configuration
            .get("delta.appendOnly")
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    pub fn column_mapping_mode(&self) -> Option<String> {
        self.configuration.get("delta.columnMapping.mode").cloned()
    }
}

/// Advertises required client capability (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    #[serde(rename = "minReaderVersion")]
    pub min_reader_version: i32,
    #[serde(rename = "minWriterVersion")]
    pub min_writer_version: i32,
    #[serde(rename = "readerFeatures", default, skip_serializing_if = "Option::is_none")]
    pub reader_features: Option<Vec<String>>,
    #[serde(rename = "writerFeatures", default, skip_serializing_if = "Option::is_none")]
    pub writer_features: Option<Vec<String>>,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol {
            min_reader_version: 1,
            min_writer_version: 1,
            reader_features: None,
            writer_features: None,
        }
    }
}

/// Reader features this engine knows how to honor. A table whose protocol
/// lists anything outside this set is refused (spec §6: "the reader must
/// refuse tables whose protocol exceeds its capability", SPEC_FULL §A.3).
pub const SUPPORTED_READER_FEATURES: &[&str] =
    &["deletionVectors", "columnMapping", "changeDataFeed"];
pub const SUPPORTED_WRITER_FEATURES: &[&str] =
    &["deletionVectors", "columnMapping", "changeDataFeed", "appendOnly"];

impl Protocol {
    pub fn validate(&self) -> DeltaResult<()> {
        if self.min_reader_version < 1 {
            return Err(Error::malformed("protocol.minReaderVersion must be >= 1"));
        }
        if self.min_writer_version < 1 {
            return Err(Error::malformed("protocol.minWriterVersion must be >= 1"));
        }
        Ok(())
    }

    /// Reject unsupported reader features.
    pub fn ensure_read_supported(&self) -> DeltaResult<()> {
        if let Some(features) = &self.reader_features {
            for f in features {
                if !SUPPORTED_READER_FEATURES.contains(&f.as_str()) {
                    return Err(Error::malformed(format!(
                        "table requires unsupported reader feature `{f}`"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Descriptive record; not state-bearing (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(rename = "engineInfo", default, skip_serializing_if = "Option::is_none")]
    pub engine_info: Option<String>,
    #[serde(rename = "isBlindAppend", default, skip_serializing_if = "Option::is_none")]
    pub is_blind_append: Option<bool>,
}

impl CommitInfo {
    pub fn new(timestamp: i64, operation: impl Into<String>, engine_info: Option<String>) -> Self {
        CommitInfo {
            timestamp,
            operation: Some(operation.into()),
            engine_info,
            is_blind_append: None,
        }
    }

    pub fn validate(&self) -> DeltaResult<()> {
        if self.timestamp < 0 {
            return Err(Error::malformed("commitInfo.timestamp must be >= 0"));
        }
        match &self.operation {
            Some(op) if !op.trim().is_empty() => Ok(()),
            _ => Err(Error::malformed("commitInfo.operation must be non-empty")),
        }
    }
}

fn validate_relative_path(path: &str) -> DeltaResult<()> {
    if path.starts_with('/') {
        return Err(Error::malformed(format!(
            "path `{path}` must be relative (no leading `/`)"
        )));
    }
    if path.split('/').any(|seg| seg == "..") {
        return Err(Error::malformed(format!(
            "path `{path}` must not contain `..` segments"
        )));
    }
    Ok(())
}

/// A single, immutable transaction-log action (Design Notes, "Sum of
/// actions"). Serialized as a single-key JSON object: `{"add": {...}}`,
/// `{"remove": {...}}`, etc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "add")]
    Add(Add),
    #[serde(rename = "remove")]
    Remove(Remove),
    #[serde(rename = "metaData")]
    Metadata(Metadata),
    #[serde(rename = "protocol")]
    Protocol(Protocol),
    #[serde(rename = "commitInfo")]
    CommitInfo(CommitInfo),
}

impl Action {
    pub fn validate(&self) -> DeltaResult<()> {
        match self {
            Action::Add(a) => a.validate(),
            Action::Remove(r) => r.validate(),
            Action::Metadata(m) => m.validate(),
            Action::Protocol(p) => p.validate(),
            Action::CommitInfo(c) => c.validate(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Add(_) => "add",
            Action::Remove(_) => "remove",
            Action::Metadata(_) => "metaData",
            Action::Protocol(_) => "protocol",
            Action::CommitInfo(_) => "commitInfo",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_rejects_absolute_and_traversal_paths() {
        let mut add = Add {
            path: "/abs/path".to_string(),
            partition_values: HashMap::new(),
            size: 0,
            modification_time: 0,
            data_change: true,
            stats: None,
            deletion_vector: None,
            tags: None,
        };
        assert!(add.validate().is_err());
        add.path = "a/../b".to_string();
        assert!(add.validate().is_err());
        add.path = "a/b.parquet".to_string();
        assert!(add.validate().is_ok());
    }

    #[test]
    fn file_stats_rejects_null_count_over_num_records() {
        let stats = FileStats {
            num_records: 1,
            null_count: HashMap::from([("x".to_string(), 2)]),
            ..Default::default()
        };
        assert!(stats.validate().is_err());
    }

    #[test]
    fn protocol_refuses_unsupported_reader_feature() {
        let protocol = Protocol {
            min_reader_version: 3,
            min_writer_version: 7,
            reader_features: Some(vec!["v2Checkpoint".to_string()]),
            writer_features: None,
        };
        assert!(protocol.ensure_read_supported().is_err());
    }
}
