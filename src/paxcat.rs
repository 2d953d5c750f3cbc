//! Main paxcat entry point
//!
//! [`Paxcat`] ties the pieces together for one backup: it owns a validated
//! [`BackupPlan`] and the [`ArchiveOptions`], opens both output files, and
//! drives a [`TreeWalker`] over the source tree.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use paxcat::PaxcatBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let paxcat = PaxcatBuilder::new()
//!     .sort_entries(true)
//!     .compression_level(6)
//!     .build("/home/alice", "/backups/alice")?;
//!
//! let report = paxcat.run()?;
//! println!("{} members, {} bytes", report.stats.members(), report.stats.bytes);
//!
//! assert!(paxcat.verify()?.is_valid());
//! # Ok(())
//! # }
//! ```

use crate::archive::{PaxArchiveWriter, DEFAULT_COMPRESSION_LEVEL};
use crate::config::{ArchiveOptions, BackupPlan};
use crate::error::{PaxcatError, Result};
use crate::types::{ArchiveStats, EventCallback};
use crate::verification::{verify_backup, VerificationReport};
use crate::walker::TreeWalker;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupReport {
    /// Archive root
    pub source_dir: PathBuf,
    /// Written archive
    pub archive_path: PathBuf,
    /// Written catalog
    pub catalog_path: PathBuf,
    /// What was archived
    pub stats: ArchiveStats,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds
    pub elapsed_ms: u64,
}

/// One configured backup
pub struct Paxcat {
    plan: BackupPlan,
    options: ArchiveOptions,
    on_event: Option<EventCallback>,
}

impl std::fmt::Debug for Paxcat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paxcat")
            .field("plan", &self.plan)
            .field("options", &self.options)
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

impl Paxcat {
    /// Configure a backup of `source` into `<prefix>.pax.gz` and `<prefix>.txt`
    /// with default options
    pub fn new(source: impl AsRef<Path>, prefix: impl AsRef<Path>) -> Result<Self> {
        PaxcatBuilder::new().build(source, prefix)
    }

    /// Validated paths of this backup
    pub fn plan(&self) -> &BackupPlan {
        &self.plan
    }

    /// Options of this backup
    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    /// Archive the whole source tree and write its catalog
    ///
    /// Both output files are created here and must not exist yet. On error
    /// the partial outputs are left on disk and must not be trusted.
    ///
    /// # Errors
    ///
    /// Any [`PaxcatError`] raised while walking, reading, archiving or
    /// cataloging. The first error ends the run.
    #[instrument(skip(self), fields(source = ?self.plan.source_dir))]
    pub fn run(&self) -> Result<BackupReport> {
        let started_at = Utc::now();
        let start = Instant::now();

        let archive = PaxArchiveWriter::create(&self.plan.archive_path, self.options.compression_level)?;
        let catalog_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.plan.catalog_path)
            .map_err(PaxcatError::CatalogWrite)?;

        let mut walker = TreeWalker::new(
            self.plan.source_dir.clone(),
            self.options.clone(),
            archive,
            BufWriter::new(catalog_file),
        );
        if let Some(callback) = &self.on_event {
            walker = walker.with_event_callback(Arc::clone(callback));
        }

        let stats = walker.run()?;

        // Both writers are finished; make the bytes durable
        let (archive, catalog) = walker.into_parts();
        archive
            .into_inner()?
            .into_inner()
            .map_err(|e| PaxcatError::archive_write(&self.plan.archive_path, e.into_error()))?
            .sync_all()
            .map_err(|e| PaxcatError::archive_write(&self.plan.archive_path, e))?;
        catalog
            .into_inner()
            .into_inner()
            .map_err(|e| PaxcatError::CatalogWrite(e.into_error()))?
            .sync_all()
            .map_err(PaxcatError::CatalogWrite)?;

        let elapsed = start.elapsed();
        info!(
            "Archived {} members ({} bytes) in {:?}",
            stats.members(),
            stats.bytes,
            elapsed
        );

        Ok(BackupReport {
            source_dir: self.plan.source_dir.clone(),
            archive_path: self.plan.archive_path.clone(),
            catalog_path: self.plan.catalog_path.clone(),
            stats,
            started_at,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Cross-check the archive and catalog written by [`Paxcat::run`]
    pub fn verify(&self) -> Result<VerificationReport> {
        debug!("Verifying {:?}", self.plan.archive_path);
        verify_backup(&self.plan.archive_path, &self.plan.catalog_path)
    }
}

/// Builder for a [`Paxcat`] run
///
/// # Examples
///
/// ```rust,no_run
/// use paxcat::{PaxcatBuilder, WalkEvent};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let paxcat = PaxcatBuilder::new()
///     .utc_timestamps(true)
///     .on_event(Arc::new(|event: &WalkEvent| {
///         if let WalkEvent::Skipped(path) = event {
///             eprintln!("skipped {}", path.display());
///         }
///     }))
///     .build("./project", "./project-backup")?;
/// # Ok(())
/// # }
/// ```
pub struct PaxcatBuilder {
    options: ArchiveOptions,
    on_event: Option<EventCallback>,
}

impl PaxcatBuilder {
    /// Create a builder with default options
    pub fn new() -> Self {
        Self {
            options: ArchiveOptions::default(),
            on_event: None,
        }
    }

    /// Process each directory's entries in file-name order
    ///
    /// Off by default: entries are taken in whatever order the directory
    /// listing yields them.
    pub fn sort_entries(mut self, sort: bool) -> Self {
        self.options.sort_entries = sort;
        self
    }

    /// Set the gzip level (0 to 9); levels above 9 are clamped
    pub fn compression_level(mut self, level: u32) -> Self {
        self.options.compression_level = level.min(DEFAULT_COMPRESSION_LEVEL);
        self
    }

    /// Render catalog timestamps in UTC instead of local time
    pub fn utc_timestamps(mut self, utc: bool) -> Self {
        self.options.utc_timestamps = utc;
        self
    }

    /// Receive a [`WalkEvent`](crate::types::WalkEvent) for every directory and entry
    pub fn on_event(mut self, callback: EventCallback) -> Self {
        self.on_event = Some(callback);
        self
    }

    /// Validate the paths and build the backup
    ///
    /// # Errors
    ///
    /// [`PaxcatError::Validation`] as described on [`BackupPlan::new`].
    pub fn build(self, source: impl AsRef<Path>, prefix: impl AsRef<Path>) -> Result<Paxcat> {
        let plan = BackupPlan::new(source.as_ref(), prefix.as_ref())?;
        Ok(Paxcat {
            plan,
            options: self.options,
            on_event: self.on_event,
        })
    }
}

impl Default for PaxcatBuilder {
    fn default() -> Self {
        Self::new()
    }
}
