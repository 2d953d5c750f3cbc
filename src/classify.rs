//! Entry classification
//!
//! Every directory entry is sorted into one of four kinds before anything
//! else happens to it. The check order matters: a symlink must be recognised
//! before any "is it a directory" test, otherwise a link to a directory would
//! be descended into, which can loop forever or pull content from outside
//! the source tree into the archive.

use crate::error::{PaxcatError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, Metadata};
use std::path::Path;

/// The kind of a filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Symbolic link, archived as a link and never followed
    Symlink,
    /// Directory, archived as an empty member and queued for descent
    Directory,
    /// Regular file, archived with its content and hashed
    File,
    /// Device, socket, FIFO and anything else; reported and skipped
    Other,
}

impl EntryKind {
    /// Whether entries of this kind end up in the archive and catalog
    pub fn is_archived(self) -> bool {
        !matches!(self, EntryKind::Other)
    }

    /// Short label used in progress output
    pub fn label(self) -> &'static str {
        match self {
            EntryKind::Symlink => "symlink",
            EntryKind::Directory => "directory",
            EntryKind::File => "file",
            EntryKind::Other => "other",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify metadata obtained without following symlinks
pub fn classify(metadata: &Metadata) -> EntryKind {
    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    }
}

/// `lstat` a path and classify it
///
/// A failing `lstat` (permission denied, entry vanished) is not recovered
/// here; it comes back as [`PaxcatError::SourceRead`].
pub fn classify_path(path: &Path) -> Result<(EntryKind, Metadata)> {
    let metadata = fs::symlink_metadata(path).map_err(|e| PaxcatError::source_read(path, e))?;
    Ok((classify(&metadata), metadata))
}
