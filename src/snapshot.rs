//! Snapshot builder: replays log entries (optionally from a checkpoint) to
//! materialize the active file set, metadata, and protocol versions (spec
//! §4.2).

use std::collections::HashMap;

use tracing::{instrument, warn};

use crate::actions::{Action, Add, Metadata, Protocol};
use crate::checkpoint;
use crate::error::{DeltaResult, Error};
use crate::log::{codec, LogSegment};
use crate::store::ObjectStoreAdapter;
use crate::Version;

/// `(version, files, metadata?, protocol?)` (spec §3).
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub version: Version,
    pub files: Vec<Add>,
    pub metadata: Option<Metadata>,
    pub protocol: Option<Protocol>,
}

impl Snapshot {
    /// An empty table: `version=-1, files=[]` (spec §8 boundary behaviors).
    pub fn empty() -> Snapshot {
        Snapshot {
            version: -1,
            files: Vec::new(),
            metadata: None,
            protocol: None,
        }
    }
}

/// Intermediate reconciliation state threaded through log replay. Also used
/// by [`crate::checkpoint`] to seed state from a checkpoint's rows before
/// replaying the commits on top of it.
pub(crate) struct ReplayState {
    pub(crate) files: HashMap<String, Add>,
    pub(crate) metadata: Option<Metadata>,
    pub(crate) protocol: Option<Protocol>,
}

impl ReplayState {
    pub(crate) fn empty() -> Self {
        ReplayState {
            files: HashMap::new(),
            metadata: None,
            protocol: None,
        }
    }

    /// Apply one commit's actions per invariant I2 / spec §4.2 step 4: first
    /// collapse the commit's own adds/removes per path into a `path ->
    /// (add | tombstone)` map (last action for a path within a commit wins),
    /// then apply that map to the accumulated snapshot.
    pub(crate) fn apply_commit(&mut self, actions: &[Action]) {
        enum PathOutcome {
            Present(Add),
            Absent,
        }
        let mut per_path: HashMap<String, PathOutcome> = HashMap::new();

        for action in actions {
            match action {
                Action::Add(add) => {
                    per_path.insert(add.path.clone(), PathOutcome::Present(add.clone()));
                }
                Action::Remove(remove) => {
                    per_path.insert(remove.path.clone(), PathOutcome::Absent);
                }
                Action::Metadata(m) => self.metadata = Some(m.clone()),
                Action::Protocol(p) => self.protocol = Some(p.clone()),
                Action::CommitInfo(_) => {}
            }
        }

        for (path, outcome) in per_path {
            match outcome {
                PathOutcome::Present(add) => {
                    self.files.insert(path, add);
                }
                PathOutcome::Absent => {
                    self.files.remove(&path);
                }
            }
        }
    }
}

/// Whether a gap in commit versions aborts replay or is tolerated
/// best-effort (spec §4.2 failure modes, Open Questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapPolicy {
    Strict,
    BestEffort,
}

/// Build a [`Snapshot`] at `target_version` (or the latest version, if
/// `None`).
#[instrument(skip(store), fields(log_root))]
pub async fn snapshot(
    store: &dyn ObjectStoreAdapter,
    log_root: &str,
    target_version: Option<Version>,
    gap_policy: GapPolicy,
    codec: &dyn crate::codec::ColumnarCodec,
) -> DeltaResult<Snapshot> {
    let segment = LogSegment::discover(store, log_root, target_version).await?;
    let Some(end_version) = segment.latest_version().or(target_version) else {
        return Ok(Snapshot::empty());
    };

    let mut state = ReplayState::empty();
    let mut start_version = 0;

    if let Some(checkpoint_version) = segment.checkpoint_version {
        match checkpoint::read_checkpoint(store, log_root, &segment, codec).await {
            Ok(checkpoint_state) => {
                state = checkpoint_state;
                start_version = checkpoint_version + 1;
            }
            Err(e) => {
                warn!(error = %e, version = checkpoint_version, "failed to read checkpoint, falling back to full replay");
            }
        }
    }

    let mut expected = start_version;
    for commit in segment
        .commits
        .iter()
        .filter(|c| c.version >= start_version && c.version <= end_version)
    {
        if commit.version != expected {
            let gap = expected;
            if gap_policy == GapPolicy::Strict {
                return Err(Error::malformed(format!(
                    "gap detected in commit log: expected version {gap}, found {}",
                    commit.version
                )));
            }
            warn!(gap, "gap in commit log tolerated under best-effort replay");
        }
        let path = format!("{}{}", log_root, commit.filename);
        let bytes = store.read(&path).await?;
        let actions = codec::parse_actions(&bytes)?;
        state.apply_commit(&actions);
        expected = commit.version + 1;
    }

    if end_version == 0 && state.protocol.is_none() {
        // Invariant I3: version 0's actions must include protocol+metaData.
        // If we got here with neither, the commit was unreadable/empty.
        return Err(Error::malformed(
            "version 0 commit is missing required protocol/metaData actions",
        ));
    }

    let mut files: Vec<Add> = state.files.into_values().collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(Snapshot {
        version: end_version,
        files,
        metadata: state.metadata,
        protocol: state.protocol,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Add, CommitInfo, Format, Protocol, Remove};
    use crate::store::{DefaultObjectStore, ObjectStoreAdapter};
    use object_store::memory::InMemory;
    use std::collections::HashMap as Map;
    use std::sync::Arc as StdArc;

    fn store() -> DefaultObjectStore {
        DefaultObjectStore::new(StdArc::new(InMemory::new()))
    }

    fn codec() -> crate::codec::ArrowParquetCodec {
        crate::codec::ArrowParquetCodec::new()
    }

    fn add(path: &str) -> Add {
        Add {
            path: path.to_string(),
            partition_values: Map::new(),
            size: 1,
            modification_time: 0,
            data_change: true,
            stats: None,
            deletion_vector: None,
            tags: None,
        }
    }

    async fn write_commit(store: &DefaultObjectStore, version: i64, actions: &[Action]) {
        let bytes = codec::serialize_actions(actions).unwrap();
        store
            .write(
                &format!("t/_delta_log/{version:020}.json"),
                bytes::Bytes::from(bytes),
            )
            .await
            .unwrap();
    }

    fn bootstrap_actions() -> Vec<Action> {
        vec![
            Action::Protocol(Protocol::default()),
            Action::Metadata(Metadata {
                id: "tbl".to_string(),
                name: None,
                description: None,
                format: Format {
                    provider: "parquet".to_string(),
                    options: Map::new(),
                },
                schema_string: r#"{}"#.to_string(),
                partition_columns: vec![],
                configuration: Map::new(),
                created_time: Some(0),
            }),
            Action::CommitInfo(CommitInfo::new(0, "CREATE", None)),
        ]
    }

    #[tokio::test]
    async fn empty_table_has_version_negative_one() {
        let store = store();
        let snap = snapshot(&store, "missing/_delta_log/", None, GapPolicy::Strict, &codec())
            .await
            .unwrap();
        assert_eq!(snap.version, -1);
        assert!(snap.files.is_empty());
    }

    #[tokio::test]
    async fn s1_first_write_creates_v0() {
        let store = store();
        let mut actions = bootstrap_actions();
        actions.push(Action::Add(add("part-00000000000000000000.parquet")));
        write_commit(&store, 0, &actions).await;

        let snap = snapshot(&store, "t/_delta_log/", None, GapPolicy::Strict, &codec())
            .await
            .unwrap();
        assert_eq!(snap.version, 0);
        assert_eq!(snap.files.len(), 1);
        assert!(snap.protocol.is_some());
        assert!(snap.metadata.is_some());
    }

    #[tokio::test]
    async fn s2_remove_then_add_same_commit() {
        let store = store();
        write_commit(&store, 0, &{
            let mut a = bootstrap_actions();
            a.push(Action::Add(add("F")));
            a
        })
        .await;

        write_commit(
            &store,
            1,
            &[
                Action::Remove(Remove {
                    path: "F".to_string(),
                    deletion_timestamp: 1,
                    data_change: true,
                    partition_values: Map::new(),
                    size: None,
                    deletion_vector: None,
                }),
                Action::Add(add("F2")),
            ],
        )
        .await;

        let snap = snapshot(&store, "t/_delta_log/", Some(1), GapPolicy::Strict, &codec())
            .await
            .unwrap();
        assert_eq!(snap.files.len(), 1);
        assert_eq!(snap.files[0].path, "F2");

        // remove(F), add(F2), add(F) again -> F survives (last add wins)
        write_commit(
            &store,
            2,
            &[
                Action::Remove(Remove {
                    path: "F2".to_string(),
                    deletion_timestamp: 2,
                    data_change: true,
                    partition_values: Map::new(),
                    size: None,
                    deletion_vector: None,
                }),
                Action::Add(add("F")),
            ],
        )
        .await;
        let snap = snapshot(&store, "t/_delta_log/", Some(2), GapPolicy::Strict, &codec())
            .await
            .unwrap();
        let paths: Vec<_> = snap.files.iter().map(|a| a.path.clone()).collect();
        assert_eq!(paths, vec!["F".to_string()]);
    }

    #[tokio::test]
    async fn gap_detected_by_default() {
        let store = store();
        write_commit(&store, 0, &bootstrap_actions()).await;
        write_commit(&store, 2, &[]).await;
        let err = snapshot(&store, "t/_delta_log/", None, GapPolicy::Strict, &codec()).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn gap_tolerated_best_effort() {
        let store = store();
        write_commit(&store, 0, &bootstrap_actions()).await;
        write_commit(&store, 2, &[Action::Add(add("F"))]).await;
        let snap = snapshot(&store, "t/_delta_log/", None, GapPolicy::BestEffort, &codec())
            .await
            .unwrap();
        assert_eq!(snap.files.len(), 1);
    }
}
