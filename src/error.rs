//! Crate-wide error aggregation.
//!
//! Each stage of the pipeline owns a narrow error enum; this module only
//! aggregates them into one type so callers at the pipeline boundary don't
//! need to match on five different error types.

use thiserror::Error;

use crate::store::StoreError;
use crate::tja::TjaError;
use crate::walk::WalkError;

/// An error occurred while running the ingestion pipeline.
///
/// Most failures the pipeline encounters (a malformed chart, a missing
/// wave file, an unknown course) are not represented here at all: they are
/// recorded as [`crate::record::Issue`]s and never interrupt a scan. This
/// type is reserved for the "engine-level hard errors" bucket of the
/// specification: a file that disappeared mid-scan, a path that escaped
/// the songs root, or a database driver failure after retries.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum IngestError {
    /// Walking the songs root failed.
    #[error("walk error: {0}")]
    Walk(#[from] WalkError),
    /// Parsing a chart raised a fatal (not chart-level) error.
    #[error("tja error: {0}")]
    Tja(#[from] TjaError),
    /// A store operation failed irrecoverably.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// A file vanished between being listed and being read.
    #[error("file disappeared mid-scan: {path}")]
    FileDisappeared {
        /// The path that could no longer be read.
        path: String,
    },
    /// A resolved path escaped the configured songs root.
    #[error("path escaped songs root: {path}")]
    PathEscapedRoot {
        /// The offending path, as given.
        path: String,
    },
}

/// A crate-wide result alias.
pub type Result<T> = std::result::Result<T, IngestError>;
