//! The TJA chart parser.
//!
//! This module consists of three phases: decoding raw bytes into
//! normalized text ([`decode`]), line-oriented tokenizing of directives and
//! note streams ([`parser`]), and course-name resolution ([`course`]).
//!
//! `model` provides the immutable result types: [`model::ParsedTja`] is
//! built by [`parser::parse`] via a growing `Vec<ChartSummary>` indexed by
//! the currently active course, then frozen once parsing completes — there
//! is no cyclic parser state or shared mutable course record.
//!
//! In detail, our policies are:
//!
//! - Tolerate malformed content: almost everything becomes a chart-level
//!   or record-level issue rather than a hard error.
//! - Never reset or mutate a course's counts because of an unrecognized
//!   directive.
//! - Never follow `SONGID` for song identity (see [`crate::groupkey`]).

pub mod clean;
pub mod course;
pub mod decode;
pub mod directive;
pub mod model;
pub mod parser;

use std::path::PathBuf;

use thiserror::Error;

pub use model::{ChartSummary, DojoSegment, Metadata, ParsedTja};
pub use parser::parse_file;

/// An error occurred parsing a chart file.
///
/// This is reserved for the rare case the file itself cannot be read; all
/// malformed-content cases surface as [`model::ChartIssue`]s instead.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TjaError {
    /// The file could not be read from disk.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The path that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
