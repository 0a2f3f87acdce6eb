//! Unified error enumeration for the tablegraph crate.
//!
//! Every fallible operation in the engine, object store, metadata store, Splitfile
//! executor, and sync protocol returns `Result<T, Error>`. Each variant carries a
//! human-readable message; `Error::Engine` additionally carries the SQL text that
//! produced the failure so it can be surfaced for diagnostics.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("repository already exists: {0}")]
    RepositoryExists(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("ambiguous reference `{reference}`: matches {candidates:?}")]
    AmbiguousReference {
        reference: String,
        candidates: Vec<String>,
    },

    #[error("tag already exists: {0}")]
    TagExists(String),

    #[error("tag not found: {0}")]
    TagNotFound(String),

    #[error("uncommitted changes present in {0}; commit or pass force to discard")]
    UncommittedChanges(String),

    #[error("image {0} is currently checked out; uncheckout first")]
    CheckedOutImage(String),

    #[error("no image checked out in {0}; checkout an image first")]
    NoCheckedOutImage(String),

    #[error("no OUTPUT repository set before SQL step")]
    NoOutputSet,

    #[error("splitfile parse error: {0}")]
    ParseError(String),

    #[error("unresolved splitfile parameter(s): {0:?}")]
    UnresolvedParameter(Vec<String>),

    #[error("object corruption: {0}")]
    ObjectCorruption(String),

    #[error("engine error running `{sql}`: {message}")]
    Engine { message: String, sql: String },

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    pub fn engine(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Error::Engine {
            message: message.into(),
            sql: sql.into(),
        }
    }

    /// True for errors the Splitfile executor treats as a cache miss rather than a
    /// fatal abort (spec §7 policy).
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, Error::ImageNotFound(_))
    }
}
