//! Error types for paxcat
//!
//! Every error in this module is fatal to a backup run: nothing is retried
//! and nothing is recovered locally. A run either produces a complete,
//! consistent archive and catalog pair, or neither output should be trusted.
//! The only condition that is recovered is an entry that is neither a file,
//! a directory nor a symlink, and that never surfaces as an error at all.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in paxcat
pub type Result<T> = std::result::Result<T, PaxcatError>;

/// Main error type for all paxcat operations
#[derive(Debug, Error)]
pub enum PaxcatError {
    /// Bad source or destination paths, detected before any entry is processed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The archive container refused a member (disk full, I/O error, short stream)
    #[error("Archive write failed for {path:?}: {source}")]
    ArchiveWrite {
        /// Relative path of the member being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The catalog sink refused a line
    #[error("Catalog write failed: {0}")]
    CatalogWrite(#[source] std::io::Error),

    /// Reading an entry from the source tree failed
    #[error("Cannot read {path:?}: {source}")]
    SourceRead {
        /// Absolute path of the entry
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The relay's archive task failed while the file was being streamed
    #[error("Archive task failed for {path:?}: {source}")]
    RelayConsumer {
        /// Relative path of the member being relayed
        path: PathBuf,
        /// Error raised on the archive side
        #[source]
        source: Box<PaxcatError>,
    },

    /// Both sides of the relay failed
    #[error("Relay aborted for {path:?}: reader failed ({producer}), archive task failed ({consumer})")]
    RelayAborted {
        /// Relative path of the member being relayed
        path: PathBuf,
        /// Error raised while reading the source file
        producer: Box<PaxcatError>,
        /// Error raised on the archive side
        consumer: Box<PaxcatError>,
    },

    /// Archive and catalog disagree
    #[error("Verification failed: {0}")]
    Verification(String),

    /// A catalog line could not be parsed
    #[error("Malformed catalog line {line}: {reason}")]
    CatalogParse {
        /// 1-based line number
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    /// I/O errors outside of the archive and catalog sinks
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaxcatError {
    /// Create a validation error with a custom message
    pub fn validation(msg: impl Into<String>) -> Self {
        PaxcatError::Validation(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        PaxcatError::Internal(msg.into())
    }

    /// Wrap an I/O error raised while appending `path` to the archive
    pub fn archive_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PaxcatError::ArchiveWrite {
            path: path.into(),
            source,
        }
    }

    /// Wrap an I/O error raised while reading `path` from the source tree
    pub fn source_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PaxcatError::SourceRead {
            path: path.into(),
            source,
        }
    }

    /// Check if this error was raised while writing one of the two outputs
    ///
    /// When this is true the output files are known to be incomplete.
    pub fn is_output_failure(&self) -> bool {
        matches!(
            self,
            PaxcatError::ArchiveWrite { .. }
                | PaxcatError::CatalogWrite(_)
                | PaxcatError::RelayConsumer { .. }
                | PaxcatError::RelayAborted { .. }
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            PaxcatError::SourceRead { path, source }
                if source.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                format!(
                    "Permission denied for {:?}. Check file permissions or run with appropriate privileges.",
                    path
                )
            }
            PaxcatError::ArchiveWrite { .. }
            | PaxcatError::CatalogWrite(_)
            | PaxcatError::RelayConsumer { .. }
            | PaxcatError::RelayAborted { .. } => {
                format!("{}. The archive and catalog are incomplete and must not be used.", self)
            }
            _ => self.to_string(),
        }
    }
}
