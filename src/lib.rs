//! # paxcat - single-pass directory backups with a checksum catalog
//!
//! paxcat walks a directory tree once and produces two files side by side:
//!
//! - `<prefix>.pax.gz`: a gzip-compressed POSIX.1-2001 (PAX) tar archive
//!   holding every regular file, directory and symlink below the source root
//! - `<prefix>.txt`: a tab-separated catalog with one line per archived
//!   entry (permissions, SHA-1 digest, size, modification time, name)
//!
//! Every file is read from disk exactly once. The same bytes feed the SHA-1
//! hasher and the archive member, so the catalog digest always describes
//! what was archived.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paxcat::Paxcat;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let paxcat = Paxcat::new("./my_project", "/backups/my_project")?;
//! let report = paxcat.run()?;
//! println!(
//!     "{} files, {} directories, {} symlinks",
//!     report.stats.files, report.stats.directories, report.stats.symlinks
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## The catalog
//!
//! Each processed directory contributes a header line (an empty first field
//! and the directory's absolute path) followed by one line per entry:
//!
//! ```text
//! 	/home/alice
//! drwxr-xr-x	0000000000000000000000000000000000000000	N/A	2024-03-01 09:12:44	docs
//! -rw-r--r--	7c211433f02071597741e6ff5a8ea34789abbf43	5	2024-03-01 09:13:02	hello.txt
//! lrwxrwxrwx	0000000000000000000000000000000000000000	N/A	2024-03-01 09:13:10	passwd
//! ```
//!
//! Directories and symlinks carry an all-zero placeholder digest and `N/A`
//! as size. Symlinks are archived as links and never followed. Entries that
//! are neither file, directory nor symlink (FIFOs, sockets, devices) are
//! skipped with a notice.
//!
//! ## Traversal
//!
//! Directories are processed breadth-first: a directory's own entries are
//! all handled before any of its subdirectories is opened, and each
//! directory's catalog block is written out only once the directory is
//! complete.
//!
//! ## Error Handling
//!
//! All operations return `Result<T, PaxcatError>`. Every error is fatal to
//! the run; partial outputs are left behind and must not be trusted.
//!
//! ## Module Organization
//!
//! - [`walker`]: breadth-first traversal and per-entry dispatch
//! - [`relay`]: the single-read hash-and-archive conduit
//! - [`archive`]: archive container adapter (gzip PAX tar)
//! - [`catalog`]: catalog line formatting and parsing
//! - [`classify`]: entry kinds
//! - [`verification`]: cross-checking a finished archive with its catalog
//! - [`config`]: validated paths and run options
//! - [`types`]: common data structures
//! - [`error`]: error types

// Public API modules
pub mod archive;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod digest;
pub mod error;
pub mod owner;
pub mod paxcat;
pub mod relay;
pub mod types;
pub mod verification;
pub mod walker;

// Internal modules (not part of public API)
mod collections;

// Re-export main types for convenience
pub use archive::{ArchiveWriter, PaxArchiveWriter};
pub use catalog::{CatalogLine, CatalogRecord, CatalogWriter};
pub use classify::EntryKind;
pub use config::{ArchiveOptions, BackupPlan};
pub use digest::Digest;
pub use error::{PaxcatError, Result};
pub use paxcat::{BackupReport, Paxcat, PaxcatBuilder};
pub use types::*;
pub use verification::{verify_backup, VerificationIssue, VerificationReport};
pub use walker::{TreeWalker, WalkState};
