//! Core data types shared by the walker, the relay and the two writers
//!
//! ## Overview
//!
//! - **Entry**: one filesystem object as seen during traversal, built fresh
//!   for each directory-listing iteration and dropped after dispatch
//! - **ArchiveMember**: the metadata written for one archive member
//! - **ArchiveStats**: counters for a finished (or failed) run
//! - **WalkEvent**: progress notifications handed to an [`EventCallback`]

use crate::classify::EntryKind;
use crate::error::{PaxcatError, Result};
use crate::owner::OwnerResolver;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fs::{self, Metadata};
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// A filesystem object being processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Path relative to the archive root
    pub relative_path: PathBuf,
    /// Absolute path used for I/O
    pub absolute_path: PathBuf,
    /// Classification of the entry
    pub kind: EntryKind,
    /// Full `st_mode`, file type bits included
    pub mode: u32,
    /// Owner user id
    pub uid: u32,
    /// Owner group id
    pub gid: u32,
    /// Owner user name, when it resolves
    pub user_name: Option<String>,
    /// Owner group name, when it resolves
    pub group_name: Option<String>,
    /// Modification time, whole seconds since the epoch
    pub mtime: i64,
    /// Sub-second part of the modification time
    pub mtime_nsec: u32,
    /// Content size; only set for regular files
    pub size: Option<u64>,
    /// Link target; only set for symlinks
    pub link_target: Option<PathBuf>,
}

impl Entry {
    /// Build an entry from `lstat` metadata
    ///
    /// `root` is the archive root and must be a prefix of `absolute_path`.
    pub fn from_metadata(
        root: &Path,
        absolute_path: PathBuf,
        kind: EntryKind,
        metadata: &Metadata,
        owners: &mut OwnerResolver,
    ) -> Result<Self> {
        let relative_path = absolute_path
            .strip_prefix(root)
            .map_err(|_| {
                PaxcatError::internal(format!(
                    "{:?} is not inside the archive root {:?}",
                    absolute_path, root
                ))
            })?
            .to_path_buf();

        let link_target = match kind {
            EntryKind::Symlink => Some(
                fs::read_link(&absolute_path)
                    .map_err(|e| PaxcatError::source_read(&absolute_path, e))?,
            ),
            _ => None,
        };

        let uid = metadata.uid();
        let gid = metadata.gid();

        Ok(Self {
            relative_path,
            kind,
            mode: metadata.mode(),
            uid,
            gid,
            user_name: owners.user_name(uid),
            group_name: owners.group_name(gid),
            mtime: metadata.mtime(),
            mtime_nsec: metadata.mtime_nsec().clamp(0, 999_999_999) as u32,
            size: (kind == EntryKind::File).then(|| metadata.len()),
            link_target,
            absolute_path,
        })
    }

    /// Final path component, raw bytes included
    pub fn name(&self) -> &OsStr {
        self.absolute_path.file_name().unwrap_or_default()
    }

    /// Modification time as a UTC timestamp
    pub fn modified(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.mtime, self.mtime_nsec).unwrap_or_default()
    }
}

/// Metadata for one archive member
///
/// The relative path is validated on construction: it is never empty, never
/// absolute and never contains `..`, so nothing extracted from the archive
/// can land outside the extraction root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    /// Path relative to the archive root
    pub path: PathBuf,
    /// Permission bits (`st_mode & 0o7777`)
    pub mode: u32,
    /// Owner user id
    pub uid: u64,
    /// Owner group id
    pub gid: u64,
    /// Owner user name, when it resolves
    pub uname: Option<String>,
    /// Owner group name, when it resolves
    pub gname: Option<String>,
    /// Modification time, whole seconds since the epoch
    pub mtime: i64,
    /// Sub-second part of the modification time
    pub mtime_nsec: u32,
    /// Content size in bytes; zero for directories and symlinks
    pub size: u64,
    /// Member type
    pub kind: EntryKind,
    /// Link target for symlinks
    pub link_target: Option<PathBuf>,
}

impl ArchiveMember {
    /// Derive the member metadata for an entry
    pub fn from_entry(entry: &Entry) -> Result<Self> {
        if entry.kind == EntryKind::Other {
            return Err(PaxcatError::internal(format!(
                "{:?} cannot be archived",
                entry.absolute_path
            )));
        }
        validate_relative(&entry.relative_path)?;

        Ok(Self {
            path: entry.relative_path.clone(),
            mode: entry.mode & 0o7777,
            uid: u64::from(entry.uid),
            gid: u64::from(entry.gid),
            uname: entry.user_name.clone(),
            gname: entry.group_name.clone(),
            mtime: entry.mtime,
            mtime_nsec: entry.mtime_nsec,
            size: entry.size.unwrap_or(0),
            kind: entry.kind,
            link_target: entry.link_target.clone(),
        })
    }
}

fn validate_relative(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(PaxcatError::internal("archive member with an empty path"));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(PaxcatError::internal(format!(
                    "archive member path {:?} must stay below the archive root",
                    path
                )))
            }
        }
    }
    Ok(())
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveStats {
    /// Directories dequeued and listed, the root included
    pub directories_processed: usize,
    /// Regular files archived
    pub files: usize,
    /// Directory members archived (the root is not a member)
    pub directories: usize,
    /// Symlink members archived
    pub symlinks: usize,
    /// Entries skipped because they were neither file, directory nor symlink
    pub skipped: usize,
    /// Content bytes relayed into the archive
    pub bytes: u64,
}

impl ArchiveStats {
    /// Number of members written to the archive
    ///
    /// Always equal to the number of catalog data lines.
    pub fn members(&self) -> usize {
        self.files + self.directories + self.symlinks
    }
}

/// Progress notification emitted while walking
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEvent {
    /// A directory was dequeued and is about to be listed
    DirectoryStarted(PathBuf),
    /// A symlink was archived
    Symlink(PathBuf),
    /// A subdirectory was archived and queued
    DirectoryQueued(PathBuf),
    /// A regular file was archived
    File {
        /// Relative path of the file
        path: PathBuf,
        /// Bytes archived
        size: u64,
    },
    /// An entry of kind "other" was skipped
    Skipped(PathBuf),
}

/// Callback receiving walk events
pub type EventCallback = Arc<dyn Fn(&WalkEvent) + Send + Sync>;
