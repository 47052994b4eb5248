//! Error types for the scanning core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScanError>;

/// Errors produced while scanning a directory tree.
///
/// Only [`ScanError::ScanFatal`] aborts a scan outright; every other variant
/// is logged and the offending entry is skipped, and the scan continues.
/// [`ScanError::Cancelled`] is the exception: it is not an entry-level
/// failure, it is the terminal state of a cancelled scan.
#[derive(Error, Debug)]
pub enum ScanError {
    /// `Dir` does not resolve to a directory. Aborts the scan.
    #[error("scan root is not a directory: {0}")]
    ScanFatal(PathBuf),

    /// I/O error encountered while reading a directory entry. The offending
    /// subtree is skipped; the scan continues.
    #[error("traversal error at {path}: {source}")]
    TraversalError { path: PathBuf, source: io::Error },

    /// Two distinct on-disk names normalize to the same canonical form, or
    /// the repair rename itself failed.
    #[error("normalization conflict for {path}: {reason}")]
    NormalizationConflict { path: PathBuf, reason: String },

    /// A relative path was not valid UTF-8.
    #[error("invalid encoding in path: {0}")]
    InvalidEncoding(PathBuf),

    /// Cancellation was signaled before the scan completed.
    #[error("scan cancelled")]
    Cancelled,

    /// A file disappeared, shrank, or became unreadable mid-hash. The
    /// descriptor is not emitted; the next scan will reconsider the file.
    #[error("hash error for {path}: {reason}")]
    HashError { path: PathBuf, reason: String },
}

/// Coarse classification for logging and for embedders that want to bucket
/// errors without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Fatal,
    Traversal,
    Normalization,
    Encoding,
    Cancellation,
    Hashing,
}

impl ScanError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ScanError::ScanFatal(_) => ErrorCategory::Fatal,
            ScanError::TraversalError { .. } => ErrorCategory::Traversal,
            ScanError::NormalizationConflict { .. } => ErrorCategory::Normalization,
            ScanError::InvalidEncoding(_) => ErrorCategory::Encoding,
            ScanError::Cancelled => ErrorCategory::Cancellation,
            ScanError::HashError { .. } => ErrorCategory::Hashing,
        }
    }

    /// Only [`ScanError::ScanFatal`] should abort the whole scan; everything
    /// else is per-entry and the caller may simply log it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::ScanFatal(_))
    }
}
