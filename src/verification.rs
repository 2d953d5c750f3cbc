//! Archive and catalog cross-checking
//!
//! A finished backup can be audited without extracting anything: the
//! archive is streamed through the decompressor, every regular member is
//! hashed, and the result is compared with the catalog line recorded for
//! the same path.
//!
//! ## How catalog lines map to paths
//!
//! Catalog lines only carry an entry's final name. The directory header
//! above a line says which directory it belongs to, and the first header is
//! the archive root, so `header - root + name` gives the member path.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use paxcat::verification::verify_backup;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let report = verify_backup(Path::new("home.pax.gz"), Path::new("home.txt"))?;
//! if report.is_valid() {
//!     println!("Backup is consistent");
//! } else {
//!     println!("{}", report.summary());
//! }
//! # Ok(())
//! # }
//! ```

use crate::catalog::{read_catalog, CatalogLine, CatalogRecord};
use crate::classify::EntryKind;
use crate::collections::{new_map, PathMap};
use crate::digest::{hash_reader, Digest};
use crate::error::{PaxcatError, Result};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tar::EntryType;
use tracing::{debug, info};

/// One disagreement between archive and catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationIssue {
    /// Cataloged but not in the archive
    MissingFromArchive(PathBuf),
    /// In the archive but not cataloged
    MissingFromCatalog(PathBuf),
    /// Catalog and archive disagree on what the entry is
    KindMismatch {
        /// Member path
        path: PathBuf,
        /// Kind implied by the catalog's permission string
        catalog: EntryKind,
        /// Kind of the archive member
        archive: EntryKind,
    },
    /// A file's recorded size differs from the member size
    SizeMismatch {
        /// Member path
        path: PathBuf,
        /// Size recorded in the catalog
        catalog: Option<u64>,
        /// Bytes stored in the archive
        archive: u64,
    },
    /// A file's recorded digest differs from the archived content
    DigestMismatch {
        /// Member path
        path: PathBuf,
        /// Digest recorded in the catalog
        catalog: Digest,
        /// Digest of the archived bytes
        archive: Digest,
    },
    /// A directory or symlink line carries a digest or size
    UnexpectedContentFields(PathBuf),
    /// The archive holds a member type paxcat never writes
    UnsupportedMember(PathBuf),
}

impl fmt::Display for VerificationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationIssue::MissingFromArchive(p) => write!(f, "{}: cataloged but not archived", p.display()),
            VerificationIssue::MissingFromCatalog(p) => write!(f, "{}: archived but not cataloged", p.display()),
            VerificationIssue::KindMismatch { path, catalog, archive } => write!(
                f,
                "{}: catalog says {}, archive holds {}",
                path.display(),
                catalog,
                archive
            ),
            VerificationIssue::SizeMismatch { path, catalog, archive } => write!(
                f,
                "{}: catalog size {:?}, archive size {}",
                path.display(),
                catalog,
                archive
            ),
            VerificationIssue::DigestMismatch { path, catalog, archive } => write!(
                f,
                "{}: catalog digest {}, archive digest {}",
                path.display(),
                catalog,
                archive
            ),
            VerificationIssue::UnexpectedContentFields(p) => {
                write!(f, "{}: non-file line with a digest or size", p.display())
            }
            VerificationIssue::UnsupportedMember(p) => write!(f, "{}: unsupported member type", p.display()),
        }
    }
}

/// Result of cross-checking one archive with its catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Archive members read
    pub members_checked: usize,
    /// Catalog data lines read
    pub catalog_entries: usize,
    /// Content bytes hashed
    pub bytes_hashed: u64,
    /// Every disagreement found
    pub issues: Vec<VerificationIssue>,
}

impl VerificationReport {
    /// Whether archive and catalog agree completely
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
            && self.members_checked == self.catalog_entries
    }

    /// Human-readable summary
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Verification Report:\n  Members checked: {}\n  Catalog entries: {}\n  Bytes hashed: {}\n  Status: {}",
            self.members_checked,
            self.catalog_entries,
            self.bytes_hashed,
            if self.is_valid() { "VALID" } else { "INVALID" }
        );
        for issue in &self.issues {
            out.push_str(&format!("\n  - {}", issue));
        }
        out
    }
}

/// Cross-check an archive with its catalog
///
/// # Errors
///
/// I/O errors reading either file, and [`PaxcatError::CatalogParse`] for a
/// catalog that is not in paxcat's format. Disagreements are not errors;
/// they are listed in the report.
pub fn verify_backup(archive_path: &Path, catalog_path: &Path) -> Result<VerificationReport> {
    let catalog_file = File::open(catalog_path)?;
    let expected = catalog_by_path(read_catalog(BufReader::new(catalog_file))?)?;

    let mut report = VerificationReport {
        catalog_entries: expected.len(),
        ..Default::default()
    };
    let mut remaining = expected;

    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(File::open(archive_path)?)));
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path: PathBuf = entry.path()?.components().collect();
        let kind = match entry.header().entry_type() {
            EntryType::Regular | EntryType::Continuous => EntryKind::File,
            EntryType::Directory => EntryKind::Directory,
            EntryType::Symlink => EntryKind::Symlink,
            _ => EntryKind::Other,
        };
        report.members_checked += 1;

        let content = if kind == EntryKind::File {
            let (digest, size) = hash_reader(&mut entry)?;
            report.bytes_hashed += size;
            Some((digest, size))
        } else {
            None
        };

        if kind == EntryKind::Other {
            report.issues.push(VerificationIssue::UnsupportedMember(path.clone()));
        }

        match remaining.remove(&path) {
            Some(line) => check_member(&path, kind, content, &line, &mut report.issues),
            None => report.issues.push(VerificationIssue::MissingFromCatalog(path)),
        }
    }

    let mut missing: Vec<PathBuf> = remaining.into_keys().collect();
    missing.sort();
    report
        .issues
        .extend(missing.into_iter().map(VerificationIssue::MissingFromArchive));

    debug!("Verified {:?} against {:?}", archive_path, catalog_path);
    info!(
        "Verification: {} members, {} catalog entries, {} issues",
        report.members_checked,
        report.catalog_entries,
        report.issues.len()
    );
    Ok(report)
}

fn check_member(
    path: &Path,
    kind: EntryKind,
    content: Option<(Digest, u64)>,
    line: &CatalogLine,
    issues: &mut Vec<VerificationIssue>,
) {
    if line.kind() != kind {
        issues.push(VerificationIssue::KindMismatch {
            path: path.to_path_buf(),
            catalog: line.kind(),
            archive: kind,
        });
        return;
    }

    match content {
        Some((digest, size)) => {
            if line.size != Some(size) {
                issues.push(VerificationIssue::SizeMismatch {
                    path: path.to_path_buf(),
                    catalog: line.size,
                    archive: size,
                });
            }
            if line.digest != digest {
                issues.push(VerificationIssue::DigestMismatch {
                    path: path.to_path_buf(),
                    catalog: line.digest,
                    archive: digest,
                });
            }
        }
        None => {
            if !line.digest.is_placeholder() || line.size.is_some() {
                issues.push(VerificationIssue::UnexpectedContentFields(path.to_path_buf()));
            }
        }
    }
}

/// Key every catalog data line by its path relative to the root
fn catalog_by_path(records: Vec<CatalogRecord>) -> Result<PathMap<CatalogLine>> {
    let mut root: Option<PathBuf> = None;
    let mut current: Option<PathBuf> = None;
    let mut lines = new_map();

    for (idx, record) in records.into_iter().enumerate() {
        match record {
            CatalogRecord::DirectoryHeader(dir) => {
                let root = root.get_or_insert_with(|| dir.clone());
                let relative = dir.strip_prefix(&*root).map_err(|_| PaxcatError::CatalogParse {
                    line: idx + 1,
                    reason: format!("directory {:?} is outside the root {:?}", dir, root),
                })?;
                current = Some(relative.to_path_buf());
            }
            CatalogRecord::Entry(line) => {
                let dir = current.as_ref().ok_or_else(|| PaxcatError::CatalogParse {
                    line: idx + 1,
                    reason: "entry before the first directory header".to_string(),
                })?;
                lines.insert(dir.join(&line.name), line);
            }
        }
    }

    Ok(lines)
}
