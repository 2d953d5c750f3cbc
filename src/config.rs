//! Run configuration and output path validation
//!
//! A backup is described by two things:
//!
//! - [`BackupPlan`]: where to read from and where the two output files go,
//!   validated before any entry is touched
//! - [`ArchiveOptions`]: how the run behaves (ordering, compression level,
//!   timestamp rendering)
//!
//! Both are built once and handed to the walker at construction; nothing is
//! read from the environment.

use crate::archive::DEFAULT_COMPRESSION_LEVEL;
use crate::error::{PaxcatError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extension of the archive file
pub const ARCHIVE_EXTENSION: &str = "pax.gz";

/// Extension of the catalog file
pub const CATALOG_EXTENSION: &str = "txt";

/// Behavioural options for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveOptions {
    /// Process each directory's entries in file-name order instead of
    /// directory-listing order
    pub sort_entries: bool,
    /// Gzip level, 0 (store) to 9 (best)
    pub compression_level: u32,
    /// Render catalog timestamps in UTC instead of local time
    pub utc_timestamps: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            sort_entries: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            utc_timestamps: false,
        }
    }
}

/// Validated source and destination paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupPlan {
    /// Canonical source directory; the archive root
    pub source_dir: PathBuf,
    /// Canonical directory receiving both outputs
    pub output_dir: PathBuf,
    /// `<prefix>.pax.gz`
    pub archive_path: PathBuf,
    /// `<prefix>.txt`
    pub catalog_path: PathBuf,
}

impl BackupPlan {
    /// Validate `source` and the output `prefix`
    ///
    /// The prefix names the outputs: `backups/home` becomes
    /// `backups/home.pax.gz` and `backups/home.txt`. An extension already on
    /// the prefix is replaced.
    ///
    /// # Errors
    ///
    /// [`PaxcatError::Validation`] when the source is missing or not a
    /// directory, the prefix's parent is missing or not a directory, the
    /// outputs would land inside the source tree, or either output file
    /// already exists.
    pub fn new(source: &Path, prefix: &Path) -> Result<Self> {
        if !source.exists() {
            return Err(PaxcatError::validation(format!(
                "Path {} does not exist!",
                source.display()
            )));
        }
        if !source.is_dir() {
            return Err(PaxcatError::validation(format!(
                "Path {} is not a directory!",
                source.display()
            )));
        }
        let source_dir = source.canonicalize()?;

        let prefix_name = prefix
            .file_name()
            .ok_or_else(|| {
                PaxcatError::validation(format!(
                    "Output {} does not name a file prefix",
                    prefix.display()
                ))
            })?
            .to_owned();
        let parent = match prefix.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if !parent.exists() {
            return Err(PaxcatError::validation(format!(
                "Path {} does not exist!",
                parent.display()
            )));
        }
        if !parent.is_dir() {
            return Err(PaxcatError::validation(format!(
                "Path {} is not a directory!",
                parent.display()
            )));
        }
        let output_dir = parent.canonicalize()?;

        if output_dir.starts_with(&source_dir) {
            return Err(PaxcatError::validation(format!(
                "Output directory {} is inside {}: you are about to archive your output files!",
                output_dir.display(),
                source_dir.display()
            )));
        }

        let base = output_dir.join(prefix_name);
        let archive_path = base.with_extension(ARCHIVE_EXTENSION);
        let catalog_path = base.with_extension(CATALOG_EXTENSION);
        for path in [&archive_path, &catalog_path] {
            if fs::symlink_metadata(path).is_ok() {
                return Err(PaxcatError::validation(format!(
                    "Path {} already exists!",
                    path.display()
                )));
            }
        }

        debug!(
            "Backup plan: {:?} -> {:?} + {:?}",
            source_dir, archive_path, catalog_path
        );
        Ok(Self {
            source_dir,
            output_dir,
            archive_path,
            catalog_path,
        })
    }
}
