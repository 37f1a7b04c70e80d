//! Checkpoint engine: writes single- or multi-part checkpoint files,
//! maintains the `_last_checkpoint` pointer, and garbage-collects old
//! checkpoints and log entries (spec §4.3).

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::actions::{Action, Add, Metadata, Protocol};
use crate::codec::{CheckpointRow, ColumnarCodec};
use crate::error::DeltaResult;
use crate::log::segment::LogSegment;
use crate::path::{
    multi_part_checkpoint_filename, parse_log_path, single_part_checkpoint_filename,
};
use crate::snapshot::ReplayState;
use crate::store::ObjectStoreAdapter;
use crate::Version;

/// Default checkpoint interval: checkpoint every 10 commits (spec §4.3).
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 10;
/// Default number of retained checkpoints.
pub const DEFAULT_RETAINED_CHECKPOINTS: usize = 10;

#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    pub interval: u64,
    pub max_checkpoint_size_bytes: u64,
    pub max_actions_per_checkpoint: u64,
    pub retained_checkpoints: usize,
    pub checkpoint_retention_ms: Option<i64>,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        CheckpointPolicy {
            interval: DEFAULT_CHECKPOINT_INTERVAL,
            max_checkpoint_size_bytes: 64 * 1024 * 1024,
            max_actions_per_checkpoint: 1_000_000,
            retained_checkpoints: DEFAULT_RETAINED_CHECKPOINTS,
            checkpoint_retention_ms: None,
        }
    }
}

/// `should_checkpoint(v)` iff `(v+1) mod interval == 0` (spec §4.3).
pub fn should_checkpoint(version: Version, policy: &CheckpointPolicy) -> bool {
    if policy.interval == 0 {
        return false;
    }
    ((version + 1) as u64) % policy.interval == 0
}

/// The `_last_checkpoint` pointer payload (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastCheckpoint {
    pub version: Version,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<u32>,
    #[serde(rename = "sizeInBytes", skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,
    #[serde(rename = "numOfAddFiles", skip_serializing_if = "Option::is_none")]
    pub num_of_add_files: Option<u64>,
}

const LAST_CHECKPOINT_PATH: &str = "_last_checkpoint";

/// Write a checkpoint summarizing `snapshot` at `version` (invariant I6: one
/// `protocol`, one `metaData`, exactly the active `add` set).
pub async fn write_checkpoint(
    store: &dyn ObjectStoreAdapter,
    log_root: &str,
    version: Version,
    files: &[Add],
    metadata: &Metadata,
    protocol: &Protocol,
    codec: &dyn ColumnarCodec,
    policy: &CheckpointPolicy,
) -> DeltaResult<()> {
    let mut rows = Vec::with_capacity(files.len() + 2);
    rows.push(CheckpointRow {
        protocol: Some(serde_json::to_string(protocol)?),
        ..Default::default()
    });
    rows.push(CheckpointRow {
        metadata: Some(serde_json::to_string(metadata)?),
        ..Default::default()
    });
    for add in files {
        rows.push(CheckpointRow {
            add: Some(serde_json::to_string(add)?),
            ..Default::default()
        });
    }

    let estimated_size: u64 = rows
        .iter()
        .map(|r| estimate_row_json_len(r) as u64 / 2)
        .sum();
    let num_parts = if estimated_size > policy.max_checkpoint_size_bytes
        || rows.len() as u64 > policy.max_actions_per_checkpoint
    {
        let by_size = estimated_size.div_ceil(policy.max_checkpoint_size_bytes.max(1));
        let by_count = (rows.len() as u64).div_ceil(policy.max_actions_per_checkpoint.max(1));
        by_size.max(by_count).max(1)
    } else {
        1
    };

    let chunk_size = rows.len().div_ceil(num_parts as usize).max(1);
    let mut total_bytes = 0u64;
    if num_parts == 1 {
        let bytes = codec.encode_checkpoint(&rows)?;
        total_bytes += bytes.len() as u64;
        let filename = single_part_checkpoint_filename(version)?;
        store.write(&format!("{log_root}{filename}"), bytes.into()).await?;
    } else {
        for (i, chunk) in rows.chunks(chunk_size).enumerate() {
            let bytes = codec.encode_checkpoint(chunk)?;
            total_bytes += bytes.len() as u64;
            let filename =
                multi_part_checkpoint_filename(version, (i + 1) as u32, num_parts as u32)?;
            store.write(&format!("{log_root}{filename}"), bytes.into()).await?;
        }
    }

    let last_checkpoint = LastCheckpoint {
        version,
        size: rows.len() as u64,
        parts: if num_parts > 1 { Some(num_parts as u32) } else { None },
        size_in_bytes: Some(total_bytes),
        num_of_add_files: Some(files.len() as u64),
    };
    let pointer_bytes = serde_json::to_vec(&last_checkpoint)?;
    store
        .write(&format!("{log_root}{LAST_CHECKPOINT_PATH}"), pointer_bytes.into())
        .await?;

    info!(version, parts = num_parts, files = files.len(), "wrote checkpoint");
    Ok(())
}

fn estimate_row_json_len(row: &CheckpointRow) -> usize {
    [&row.add, &row.remove, &row.metadata, &row.protocol]
        .iter()
        .filter_map(|o| o.as_ref().map(|s| s.len()))
        .sum()
}

/// Read the `_last_checkpoint` pointer, if present.
pub async fn read_last_checkpoint(
    store: &dyn ObjectStoreAdapter,
    log_root: &str,
) -> DeltaResult<Option<LastCheckpoint>> {
    match store.read(&format!("{log_root}{LAST_CHECKPOINT_PATH}")).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(crate::error::Error::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Read and reconcile every part of the segment's checkpoint into a
/// [`ReplayState`] ready for replay to resume from `checkpoint_version + 1`.
pub async fn read_checkpoint(
    store: &dyn ObjectStoreAdapter,
    log_root: &str,
    segment: &LogSegment,
    codec: &dyn ColumnarCodec,
) -> DeltaResult<ReplayState> {
    let mut state = ReplayState::empty();
    for part in &segment.checkpoint_parts {
        let path = format!("{log_root}{}", part.filename);
        let bytes = store.read(&path).await?;
        let rows = codec.decode_checkpoint(&bytes)?;
        for row in rows {
            if let Some(add_json) = row.add {
                let add: Add = serde_json::from_str(&add_json)?;
                state.files.insert(add.path.clone(), add);
            }
            if let Some(remove_json) = row.remove {
                let remove: crate::actions::Remove = serde_json::from_str(&remove_json)?;
                state.files.remove(&remove.path);
            }
            if let Some(meta_json) = row.metadata {
                state.metadata = Some(serde_json::from_str(&meta_json)?);
            }
            if let Some(proto_json) = row.protocol {
                state.protocol = Some(serde_json::from_str(&proto_json)?);
            }
        }
    }
    Ok(state)
}

/// Delete checkpoints and log entries older than the retention policy.
/// Individual deletion failures are logged and skipped — retention is
/// best-effort and never raises (spec §4.3, §7).
pub async fn enforce_retention(
    store: &dyn ObjectStoreAdapter,
    log_root: &str,
    policy: &CheckpointPolicy,
    now_millis: i64,
) -> Vec<String> {
    let mut failures = Vec::new();
    let Ok(paths) = store.list(log_root).await else {
        return failures;
    };

    let mut checkpoint_versions: Vec<Version> = paths
        .iter()
        .filter_map(|p| parse_log_path(p))
        .filter(|p| {
            matches!(
                p.kind,
                crate::path::LogEntryKind::SinglePartCheckpoint
                    | crate::path::LogEntryKind::MultiPartCheckpoint(..)
            )
        })
        .map(|p| p.version)
        .collect();
    checkpoint_versions.sort_unstable();
    checkpoint_versions.dedup();

    let keep = policy.retained_checkpoints.max(1);
    if checkpoint_versions.len() <= keep {
        return failures;
    }
    let cutoff_index = checkpoint_versions.len() - keep;
    let oldest_retained = checkpoint_versions[cutoff_index];

    for version in &checkpoint_versions[..cutoff_index] {
        if let Some(retention_ms) = policy.checkpoint_retention_ms {
            if let Ok(Some(stat)) = store
                .stat(&format!(
                    "{log_root}{}",
                    single_part_checkpoint_filename(*version).unwrap()
                ))
                .await
            {
                if now_millis - stat.last_modified_millis < retention_ms {
                    continue;
                }
            }
        }
        for path in paths.iter().filter(|p| {
            parse_log_path(p)
                .map(|pp| pp.version == *version && pp.kind != crate::path::LogEntryKind::Commit)
                .unwrap_or(false)
        }) {
            if let Err(e) = store.delete(path).await {
                warn!(path, error = %e, "failed to delete old checkpoint, skipping");
                failures.push(path.clone());
            }
        }
    }

    for path in paths.iter() {
        if let Some(parsed) = parse_log_path(path) {
            if parsed.kind == crate::path::LogEntryKind::Commit && parsed.version < oldest_retained
            {
                if let Err(e) = store.delete(path).await {
                    warn!(path, error = %e, "failed to delete old log entry, skipping");
                    failures.push(path.clone());
                }
            }
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_checkpoint_every_interval() {
        let policy = CheckpointPolicy::default();
        assert!(should_checkpoint(9, &policy));
        assert!(!should_checkpoint(8, &policy));
        assert!(should_checkpoint(19, &policy));
    }
}
