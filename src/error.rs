//! Error types for archive creation and extraction.
//!
//! The header codec reports problems with a single record as a [`HeaderError`].  The two archive
//! operations report an [`ArchiveError`], which adds the context needed to act on the failure:
//! the path involved, the operation that failed, or the position of a bad header in the stream.

use std::{io, path::PathBuf};

/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// A header record could not be produced or accepted.
#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    /// The path cannot be split to fit the 100-byte name and 155-byte prefix fields.
    #[error("path {0:?} cannot be represented in a ustar header")]
    UnrepresentablePath(PathBuf),

    /// A numeric value does not fit in its octal field.
    #[error("value {value} does not fit in the {field} field")]
    FieldOverflow { field: &'static str, value: u64 },

    /// A numeric field does not start with an octal number.
    #[error("unparseable {field} field")]
    InvalidField { field: &'static str },

    /// The stored checksum disagrees with the header contents.
    #[error("checksum mismatch (stored {stored:o}, computed {computed:o})")]
    ChecksumMismatch { stored: u64, computed: u64 },

    /// The entry path would be placed outside of the destination directory.
    #[error("path {0:?} escapes the destination directory")]
    UnsafePath(PathBuf),
}

/// Failure of [`create_archive`](crate::write::create_archive) or
/// [`extract_archive`](crate::extract::extract_archive).
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The path cannot be split to fit the 100-byte name and 155-byte prefix fields.
    #[error("path {0:?} cannot be represented in a ustar header")]
    UnrepresentablePath(PathBuf),

    /// A numeric value of the entry does not fit in its header field.
    #[error("{path:?}: {field} {value} does not fit in the header")]
    FieldOverflow {
        path: PathBuf,
        field: &'static str,
        value: u64,
    },

    /// A header in the archive failed validation.
    #[error("invalid header at offset {offset}: {source}")]
    InvalidHeader {
        offset: u64,
        #[source]
        source: HeaderError,
    },

    /// A filesystem operation on an archived or extracted path failed.
    #[error("{op} {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading or writing the archive stream itself failed.
    #[error("archive {op} failed: {source}")]
    Stream {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// Extraction would overwrite an existing path.
    #[error("{0:?} already exists")]
    FileExists(PathBuf),

    /// Nothing archivable was found.
    #[error("empty archive")]
    EmptyArchive,
}

impl ArchiveError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        ArchiveError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn stream(op: &'static str, source: io::Error) -> Self {
        ArchiveError::Stream { op, source }
    }
}
