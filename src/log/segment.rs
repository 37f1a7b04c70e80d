//! Discovery of commit and checkpoint files within `_delta_log/` (spec §4.2
//! step 1).

use crate::error::DeltaResult;
use crate::path::{parse_log_path, parse_multipart_checkpoint_path, LogEntryKind, ParsedLogPath};
use crate::store::ObjectStoreAdapter;
use crate::Version;

/// The set of commit and checkpoint entries relevant to building a snapshot
/// at a target version.
#[derive(Debug, Clone, Default)]
pub struct LogSegment {
    pub commits: Vec<ParsedLogPath>,
    pub checkpoint_parts: Vec<ParsedLogPath>,
    pub checkpoint_version: Option<Version>,
}

impl LogSegment {
    /// List `log_root` and classify every entry, keeping commits and
    /// checkpoint parts up to and including `end_version` (when given).
    pub async fn discover(
        store: &dyn ObjectStoreAdapter,
        log_root: &str,
        end_version: Option<Version>,
    ) -> DeltaResult<LogSegment> {
        let mut paths = store.list(log_root).await?;
        paths.sort();

        let mut commits = Vec::new();
        let mut checkpoints: Vec<ParsedLogPath> = Vec::new();
        for path in &paths {
            let filename = path.rsplit('/').next().unwrap_or(path);
            let parsed = parse_log_path(filename).or_else(|| parse_multipart_checkpoint_path(filename));
            let Some(parsed) = parsed else { continue };
            if let Some(end) = end_version {
                if parsed.version > end {
                    continue;
                }
            }
            match parsed.kind {
                LogEntryKind::Commit => commits.push(parsed),
                LogEntryKind::SinglePartCheckpoint | LogEntryKind::MultiPartCheckpoint(..) => {
                    checkpoints.push(parsed)
                }
            }
        }
        commits.sort_by_key(|p| p.version);

        // Keep only the checkpoint at the highest version <= end_version;
        // older checkpoints are superseded for replay purposes (retention is
        // a separate, best-effort concern handled by the checkpoint engine).
        let checkpoint_version = checkpoints.iter().map(|p| p.version).max();
        let checkpoint_parts: Vec<ParsedLogPath> = match checkpoint_version {
            Some(v) => checkpoints.into_iter().filter(|p| p.version == v).collect(),
            None => Vec::new(),
        };

        Ok(LogSegment {
            commits,
            checkpoint_parts,
            checkpoint_version,
        })
    }

    /// The latest version named by any entry in this segment.
    pub fn latest_version(&self) -> Option<Version> {
        let from_commits = self.commits.last().map(|p| p.version);
        let from_checkpoint = self.checkpoint_version;
        from_commits.into_iter().chain(from_checkpoint).max()
    }

    /// Commits strictly newer than the checkpoint (or all commits, if there
    /// is no checkpoint), in ascending version order.
    pub fn commits_since_checkpoint(&self) -> impl Iterator<Item = &ParsedLogPath> {
        let floor = self.checkpoint_version;
        self.commits
            .iter()
            .filter(move |p| match floor {
                Some(c) => p.version > c,
                None => true,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DefaultObjectStore, ObjectStoreAdapter};
    use object_store::memory::InMemory;
    use std::sync::Arc;

    fn in_memory_store() -> DefaultObjectStore {
        DefaultObjectStore::new(Arc::new(InMemory::new()))
    }

    #[tokio::test]
    async fn discovers_commits_and_latest_checkpoint() {
        let store = in_memory_store();
        for v in 0..3 {
            store
                .write(&format!("t/_delta_log/{v:020}.json"), bytes::Bytes::new())
                .await
                .unwrap();
        }
        store
            .write(
                "t/_delta_log/00000000000000000001.checkpoint.parquet",
                bytes::Bytes::new(),
            )
            .await
            .unwrap();

        let segment = LogSegment::discover(&store, "t/_delta_log/", None).await.unwrap();
        assert_eq!(segment.commits.len(), 3);
        assert_eq!(segment.checkpoint_version, Some(1));
        let since: Vec<_> = segment.commits_since_checkpoint().map(|p| p.version).collect();
        assert_eq!(since, vec![2]);
    }

    #[tokio::test]
    async fn respects_end_version_bound() {
        let store = in_memory_store();
        for v in 0..5 {
            store
                .write(&format!("t/_delta_log/{v:020}.json"), bytes::Bytes::new())
                .await
                .unwrap();
        }
        let segment = LogSegment::discover(&store, "t/_delta_log/", Some(2)).await.unwrap();
        assert_eq!(segment.latest_version(), Some(2));
    }
}
