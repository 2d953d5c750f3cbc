//! Breadth-first traversal driving the archive and the catalog
//!
//! [`TreeWalker`] owns everything a run touches: the archive writer, the
//! catalog writer, the work queue, the owner-name cache and the counters.
//! It is the only execution context that uses them, except for the relay's
//! archive task, which borrows the archive writer while the walker is
//! blocked waiting for it.
//!
//! ## Order
//!
//! Directories are processed first in, first out. Within a directory,
//! entries are handled in listing order (or name order with
//! [`ArchiveOptions::sort_entries`]). Subdirectories are archived and
//! cataloged when they are discovered and queued for later, so every direct
//! child of a directory is written before anything below it. Archive
//! members and catalog lines come out in the same order.
//!
//! ## Dispatch
//!
//! | Kind      | Catalog                     | Archive                | Queued |
//! |-----------|-----------------------------|------------------------|--------|
//! | Symlink   | placeholder digest, `N/A`   | link member            | no     |
//! | Directory | placeholder digest, `N/A`   | empty directory member | yes    |
//! | File      | SHA-1 digest, byte size     | relayed content        | no     |
//! | Other     | nothing                     | nothing                | no     |

use crate::archive::ArchiveWriter;
use crate::catalog::CatalogWriter;
use crate::classify::{classify_path, EntryKind};
use crate::config::ArchiveOptions;
use crate::error::{PaxcatError, Result};
use crate::owner::OwnerResolver;
use crate::relay::relay;
use crate::types::{ArchiveMember, ArchiveStats, Entry, EventCallback, WalkEvent};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// Lifecycle of a walker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
    /// Constructed, not started
    Idle,
    /// Listing and dispatching a directory
    ProcessingDirectory,
    /// Queue drained and both sinks finished
    Done,
}

/// FIFO of directories awaiting traversal
#[derive(Debug, Default)]
pub struct WorkQueue {
    dirs: VecDeque<PathBuf>,
}

impl WorkQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a directory
    pub fn push(&mut self, dir: PathBuf) {
        self.dirs.push_back(dir);
    }

    /// Take the oldest directory
    pub fn pop(&mut self) -> Option<PathBuf> {
        self.dirs.pop_front()
    }

    /// Number of directories waiting
    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

/// Breadth-first archive-and-catalog driver
pub struct TreeWalker<A: ArchiveWriter + Send, W: Write> {
    root: PathBuf,
    options: ArchiveOptions,
    archive: A,
    catalog: CatalogWriter<W>,
    queue: WorkQueue,
    state: WalkState,
    owners: OwnerResolver,
    stats: ArchiveStats,
    on_event: Option<EventCallback>,
}

impl<A: ArchiveWriter + Send, W: Write> TreeWalker<A, W> {
    /// Create a walker for the tree below `root`
    ///
    /// `root` should be absolute; its path is written verbatim in the
    /// catalog's first header line. The root itself is not an archive
    /// member: member paths are relative to it.
    pub fn new(root: PathBuf, options: ArchiveOptions, archive: A, catalog_sink: W) -> Self {
        let catalog = CatalogWriter::new(catalog_sink).with_utc_timestamps(options.utc_timestamps);
        Self {
            root,
            options,
            archive,
            catalog,
            queue: WorkQueue::new(),
            state: WalkState::Idle,
            owners: OwnerResolver::new(),
            stats: ArchiveStats::default(),
            on_event: None,
        }
    }

    /// Receive a [`WalkEvent`] for every directory and entry
    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.on_event = Some(callback);
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> WalkState {
        self.state
    }

    /// Counters so far
    pub fn stats(&self) -> &ArchiveStats {
        &self.stats
    }

    /// Give back the archive writer and the catalog writer
    pub fn into_parts(self) -> (A, CatalogWriter<W>) {
        (self.archive, self.catalog)
    }

    /// Walk the whole tree, then finish the archive and the catalog
    ///
    /// Any error aborts the run on the spot; nothing written so far is
    /// cleaned up and the outputs must be treated as invalid.
    pub fn run(&mut self) -> Result<ArchiveStats> {
        if self.state != WalkState::Idle {
            return Err(PaxcatError::internal("walker has already run"));
        }

        info!("Reading contents of {:?}", self.root);
        self.queue.push(self.root.clone());

        while let Some(dir) = self.queue.pop() {
            self.state = WalkState::ProcessingDirectory;
            self.process_directory(&dir)?;
        }

        self.archive.finish()?;
        self.catalog.finish()?;
        self.state = WalkState::Done;

        info!(
            "Archived {} members ({} files, {} directories, {} symlinks, {} bytes), skipped {}",
            self.stats.members(),
            self.stats.files,
            self.stats.directories,
            self.stats.symlinks,
            self.stats.bytes,
            self.stats.skipped
        );
        Ok(self.stats.clone())
    }

    fn process_directory(&mut self, dir: &Path) -> Result<()> {
        debug!("Processing directory {:?} ({} queued)", dir, self.queue.len());
        self.emit(WalkEvent::DirectoryStarted(dir.to_path_buf()));
        self.catalog.write_directory_header(dir);

        for path in self.list_directory(dir)? {
            self.dispatch(path)?;
        }

        // Only a fully processed directory reaches the catalog sink
        self.catalog.commit()?;
        self.stats.directories_processed += 1;
        Ok(())
    }

    fn list_directory(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut paths = fs::read_dir(dir)
            .map_err(|e| PaxcatError::source_read(dir, e))?
            .map(|entry| {
                entry
                    .map(|e| e.path())
                    .map_err(|e| PaxcatError::source_read(dir, e))
            })
            .collect::<Result<Vec<_>>>()?;

        if self.options.sort_entries {
            paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        }
        Ok(paths)
    }

    fn dispatch(&mut self, path: PathBuf) -> Result<()> {
        let (kind, metadata) = classify_path(&path)?;

        if kind == EntryKind::Other {
            info!("Skipping non-file {:?}", path);
            self.stats.skipped += 1;
            self.emit(WalkEvent::Skipped(path));
            return Ok(());
        }

        let entry = Entry::from_metadata(&self.root, path, kind, &metadata, &mut self.owners)?;
        let member = ArchiveMember::from_entry(&entry)?;
        trace!("{:?} [{}]", entry.relative_path, kind);

        if kind == EntryKind::File {
            let file = File::open(&entry.absolute_path)
                .map_err(|e| PaxcatError::source_read(&entry.absolute_path, e))?;
            let digest = relay(file, &mut self.archive, &member)?;
            self.catalog.write_entry(&entry, Some(&digest));
            self.stats.files += 1;
            self.stats.bytes += member.size;
            self.emit(WalkEvent::File {
                path: entry.relative_path,
                size: member.size,
            });
            return Ok(());
        }

        // Directories and symlinks carry no content
        self.catalog.write_entry(&entry, None);
        self.archive.add_entry(&member, None)?;
        if kind == EntryKind::Directory {
            self.stats.directories += 1;
            self.queue.push(entry.absolute_path.clone());
            self.emit(WalkEvent::DirectoryQueued(entry.relative_path));
        } else {
            self.stats.symlinks += 1;
            self.emit(WalkEvent::Symlink(entry.relative_path));
        }
        Ok(())
    }

    fn emit(&self, event: WalkEvent) {
        if let Some(callback) = &self.on_event {
            callback(&event);
        }
    }
}
