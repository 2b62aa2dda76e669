//! Error types for archive creation, iteration and extraction
//!
//! Every error is fatal to the operation that raised it: the writer, the
//! iterator and the handlers stop at the first failure and hand it back to the
//! caller. There is no skip-and-continue mode.
//!
//! | Error | Raised by |
//! |-------|-----------|
//! | [`SourceUnreadable`], [`SourceChanged`] | writer, while walking sources |
//! | [`ArchiveCreateFailed`], [`ArchiveWriteFailed`] | writer, on the destination |
//! | [`ArchiveUnreadable`] | iterator, opening the archive |
//! | [`UnsupportedCompression`] | compression kind parsing |
//! | [`CorruptStream`] | framing, decompression, short payloads |
//! | [`NameTooLong`] | header encoding |
//! | [`UnsafeEntryPath`] | extraction, before touching the filesystem |
//! | [`ExtractionFailed`] | extraction, filesystem mutations |
//! | [`OutputFailed`] | listing and pipe handlers |
//!
//! [`SourceUnreadable`]: ArchiveError::SourceUnreadable
//! [`SourceChanged`]: ArchiveError::SourceChanged
//! [`ArchiveCreateFailed`]: ArchiveError::ArchiveCreateFailed
//! [`ArchiveWriteFailed`]: ArchiveError::ArchiveWriteFailed
//! [`ArchiveUnreadable`]: ArchiveError::ArchiveUnreadable
//! [`UnsupportedCompression`]: ArchiveError::UnsupportedCompression
//! [`CorruptStream`]: ArchiveError::CorruptStream
//! [`NameTooLong`]: ArchiveError::NameTooLong
//! [`UnsafeEntryPath`]: ArchiveError::UnsafeEntryPath
//! [`ExtractionFailed`]: ArchiveError::ExtractionFailed
//! [`OutputFailed`]: ArchiveError::OutputFailed

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the engine
pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot read source {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file shrank between `stat` and the payload copy
    #[error("source {} changed while archiving: expected {expected} bytes, read {actual}", path.display())]
    SourceChanged {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("cannot create archive {}: {source}", path.display())]
    ArchiveCreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed writing archive: {0}")]
    ArchiveWriteFailed(#[source] io::Error),

    #[error("cannot open archive {}: {source}", path.display())]
    ArchiveUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unsupported compression: {0:?}")]
    UnsupportedCompression(String),

    #[error("corrupt archive stream: {0}")]
    CorruptStream(String),

    #[error("entry name too long for the archive header: {0}")]
    NameTooLong(String),

    #[error("refusing to extract entry outside the destination: {0}")]
    UnsafeEntryPath(String),

    #[error("failed to extract {}: {source}", path.display())]
    ExtractionFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed writing output: {0}")]
    OutputFailed(#[source] io::Error),
}

impl ArchiveError {
    /// Classify a read error on the archive stream.
    ///
    /// Truncation and decoder failures mean the framing can no longer be
    /// trusted, so they all collapse into [`ArchiveError::CorruptStream`].
    pub(crate) fn from_stream(err: io::Error, what: &str) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::CorruptStream(format!("truncated {what}")),
            _ => Self::CorruptStream(format!("{what}: {err}")),
        }
    }

    pub(crate) fn extraction(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::ExtractionFailed {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn source_unreadable(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::SourceUnreadable {
            path: path.into(),
            source,
        }
    }
}
