//! The object-store adapter (spec §6, required external collaborator). All
//! higher layers are parameterized over [`ObjectStoreAdapter`]; the default
//! implementation wraps the `object_store` crate the way the teacher's
//! `engine/default/storage.rs` wraps it for the default engine.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{DeltaResult, Error};

/// An opaque version tag used for conditional writes. The default
/// implementation encodes it as an `object_store::UpdateVersion` ETag/
/// generation pair; other adapters may use whatever their backend supports
/// as long as equality tracks "has this path been overwritten since".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTag(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub size: u64,
    pub last_modified_millis: i64,
}

/// Uniform storage interface (spec §6): `read`, `read_range`, `write`,
/// `write_if_absent`, `list`, `delete`, `stat`.
#[async_trait]
pub trait ObjectStoreAdapter: Send + Sync {
    async fn read(&self, path: &str) -> DeltaResult<Bytes>;

    async fn read_range(&self, path: &str, start: u64, end: u64) -> DeltaResult<Bytes>;

    async fn write(&self, path: &str, bytes: Bytes) -> DeltaResult<()>;

    /// Conditional write: the write only succeeds if the path is absent (or,
    /// when `expected_version` is `Some`, only if the path's current tag
    /// matches). On loss of the race, the adapter returns
    /// `Error::ConcurrencyConflict` — callers in [`crate::table`] always
    /// translate this to a retryable conflict with the actual current
    /// version filled in.
    async fn write_if_absent(&self, path: &str, bytes: Bytes) -> DeltaResult<()>;

    /// No ordering guarantee; callers sort.
    async fn list(&self, prefix: &str) -> DeltaResult<Vec<String>>;

    /// `stat` on a missing path never raises; it returns `Ok(None)`.
    async fn stat(&self, path: &str) -> DeltaResult<Option<Stat>>;

    /// Idempotent: deleting a missing path is success.
    async fn delete(&self, path: &str) -> DeltaResult<()>;
}

/// Default adapter backed by the `object_store` crate.
pub struct DefaultObjectStore {
    inner: std::sync::Arc<dyn object_store::ObjectStore>,
}

impl DefaultObjectStore {
    pub fn new(inner: std::sync::Arc<dyn object_store::ObjectStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ObjectStoreAdapter for DefaultObjectStore {
    async fn read(&self, path: &str) -> DeltaResult<Bytes> {
        let path = object_store::path::Path::from(path);
        match self.inner.get(&path).await {
            Ok(result) => Ok(result.bytes().await?),
            Err(object_store::Error::NotFound { path, .. }) => {
                Err(Error::NotFound(path.to_string()))
            }
            Err(e) => Err(Error::Store(e)),
        }
    }

    async fn read_range(&self, path: &str, start: u64, end: u64) -> DeltaResult<Bytes> {
        let object_path = object_store::path::Path::from(path);
        let range = (start as usize)..(end as usize);
        Ok(self.inner.get_range(&object_path, range).await?)
    }

    async fn write(&self, path: &str, bytes: Bytes) -> DeltaResult<()> {
        let object_path = object_store::path::Path::from(path);
        self.inner
            .put(&object_path, object_store::PutPayload::from_bytes(bytes))
            .await?;
        Ok(())
    }

    async fn write_if_absent(&self, path: &str, bytes: Bytes) -> DeltaResult<()> {
        let object_path = object_store::path::Path::from(path);
        let opts = object_store::PutOptions {
            mode: object_store::PutMode::Create,
            ..Default::default()
        };
        match self
            .inner
            .put_opts(&object_path, object_store::PutPayload::from_bytes(bytes), opts)
            .await
        {
            Ok(_) => Ok(()),
            Err(object_store::Error::AlreadyExists { .. }) => {
                // Translated to a proper expected/actual conflict by the
                // table core, which knows the expected version; here we
                // only know "it already exists".
                Err(Error::ConcurrencyConflict {
                    expected: -1,
                    actual: -1,
                })
            }
            Err(e) => Err(Error::Store(e)),
        }
    }

    async fn list(&self, prefix: &str) -> DeltaResult<Vec<String>> {
        use futures::TryStreamExt;
        let prefix_path = object_store::path::Path::from(prefix);
        let mut out = Vec::new();
        let mut stream = self.inner.list(Some(&prefix_path));
        while let Some(meta) = stream.try_next().await? {
            out.push(meta.location.to_string());
        }
        Ok(out)
    }

    async fn stat(&self, path: &str) -> DeltaResult<Option<Stat>> {
        let object_path = object_store::path::Path::from(path);
        match self.inner.head(&object_path).await {
            Ok(meta) => Ok(Some(Stat {
                size: meta.size as u64,
                last_modified_millis: meta.last_modified.timestamp_millis(),
            })),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(Error::Store(e)),
        }
    }

    async fn delete(&self, path: &str) -> DeltaResult<()> {
        let object_path = object_store::path::Path::from(path);
        match self.inner.delete(&object_path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(Error::Store(e)),
        }
    }
}
