//! Typed error kinds surfaced to callers. Low layers return these unchanged;
//! [`crate::table::Table`] wraps them with operation context (operation name,
//! table path, target version) before returning them to the caller.

use crate::Version;

/// Result alias used throughout the crate.
pub type DeltaResult<T> = Result<T, Error>;

/// The errors this crate can produce. Every variant here corresponds to one
/// of the error kinds in the specification: caller-supplied argument
/// violations are [`Error::Validation`], on-disk protocol violations are
/// [`Error::MalformedData`], and so on. Maintenance operations never
/// propagate an `Error` for a single-file failure; those accumulate in a
/// metrics object instead (see [`crate::maintenance`]).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-supplied argument violates a documented precondition. Raised
    /// synchronously, before any I/O.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// On-disk data violates the Delta protocol or this engine's invariants.
    #[error("malformed data: {0}")]
    MalformedData(String),

    /// A path expected to exist is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conditional commit lost the race to another writer.
    #[error("concurrent modification: expected version {expected}, actual version {actual}")]
    ConcurrencyConflict { expected: Version, actual: Version },

    /// A write introduces a field whose type conflicts with the table schema.
    #[error("incompatible schema: {0}")]
    SchemaIncompatible(String),

    /// Vacuum was asked to delete within the minimum retention window.
    #[error("retention violation: {0}")]
    RetentionViolation(String),

    /// A maintenance operation's integrity check detected corruption.
    #[error("integrity check failed: {0}")]
    IntegrityFailure(String),

    /// A transport-level error from the object store.
    #[error("object store error: {0}")]
    Store(#[from] object_store::Error),

    /// JSON (de)serialization failure in the log codec or schema parser.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying columnar codec failure (Arrow/Parquet).
    #[error("columnar codec error: {0}")]
    Codec(String),

    /// Internal invariant violation — a genuine bug, not a caller mistake.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedData(msg.into())
    }

    pub fn generic(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// True for errors a caller may reasonably retry after refreshing state.
    /// The conditional-commit race is always retryable (spec §7); transport
    /// errors are retryable by default since most are transient, but this is
    /// a coarse default — [`crate::retry::RetryPolicy`] lets callers override
    /// per-error classification.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConcurrencyConflict { .. } | Error::Store(_))
    }
}
