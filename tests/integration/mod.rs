//! End-to-end tests for paxcat
//!
//! Every test builds a real source tree on disk, runs a full backup, and then
//! reads the resulting archive and catalog back with independent tools.

use ::paxcat::catalog::{read_catalog, CatalogRecord};
use ::paxcat::*;
use flate2::read::GzDecoder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha1::{Digest as _, Sha1};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::ffi::OsStr;
use std::io::{BufReader, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;
use walkdir::WalkDir;

/// One member as read back from the archive
#[derive(Debug, Clone)]
pub struct ReadMember {
    pub path: PathBuf,
    pub entry_type: tar::EntryType,
    pub mode: u32,
    pub content: Vec<u8>,
    pub link_target: Option<PathBuf>,
}

/// Shape of a generated source tree
#[derive(Debug, Clone)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub dirs_per_level: usize,
    pub files_per_dir: usize,
    pub file_size_range: std::ops::Range<usize>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            dirs_per_level: 2,
            files_per_dir: 3,
            file_size_range: 0..20_000,
        }
    }
}

/// Source tree plus output directory for one backup
pub struct BackupHarness {
    pub source: TempDir,
    pub output: TempDir,
    pub rng: StdRng,
}

impl BackupHarness {
    pub fn new() -> Self {
        Self {
            source: TempDir::new().unwrap(),
            output: TempDir::new().unwrap(),
            rng: StdRng::seed_from_u64(42),
        }
    }

    pub fn root(&self) -> &Path {
        self.source.path()
    }

    /// Write a file with fixed permissions so catalog lines are predictable
    pub fn write_file(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        path
    }

    /// Fill the source with a random tree
    pub fn generate_tree(&mut self, config: TreeConfig) -> anyhow::Result<usize> {
        let mut files = 0;
        let mut level = vec![self.root().to_path_buf()];
        for depth in 0..=config.max_depth {
            let mut next = Vec::new();
            for dir in &level {
                for i in 0..config.files_per_dir {
                    let size = self.rng.random_range(config.file_size_range.clone());
                    let content: Vec<u8> = (0..size).map(|_| self.rng.random()).collect();
                    fs::write(dir.join(format!("file_{}_{}.bin", depth, i)), content)?;
                    files += 1;
                }
                if depth < config.max_depth {
                    for i in 0..config.dirs_per_level {
                        let sub = dir.join(format!("dir_{}_{}", depth, i));
                        fs::create_dir(&sub)?;
                        next.push(sub);
                    }
                }
            }
            level = next;
        }
        info!("Generated {} files below {:?}", files, self.root());
        Ok(files)
    }

    pub fn paxcat(&self, builder: PaxcatBuilder) -> Paxcat {
        builder
            .utc_timestamps(true)
            .build(self.root(), self.output.path().join("backup"))
            .unwrap()
    }

    pub fn run(&self, builder: PaxcatBuilder) -> BackupReport {
        self.paxcat(builder).run().unwrap()
    }
}

/// Read every member of a gzip PAX archive
pub fn read_archive(path: &Path) -> Vec<ReadMember> {
    let file = File::open(path).unwrap();
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut members = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let path: PathBuf = entry.path().unwrap().components().collect();
        let entry_type = entry.header().entry_type();
        let mode = entry.header().mode().unwrap();
        let link_target = entry.link_name().unwrap().map(|p| p.into_owned());
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        members.push(ReadMember {
            path,
            entry_type,
            mode,
            content,
            link_target,
        });
    }
    members
}

/// Read a catalog, keyed by member path, plus the header order
pub fn read_catalog_file(path: &Path) -> (Vec<PathBuf>, BTreeMap<PathBuf, CatalogLine>) {
    let records = read_catalog(BufReader::new(File::open(path).unwrap())).unwrap();
    let mut headers = Vec::new();
    let mut lines = BTreeMap::new();
    for record in records {
        match record {
            CatalogRecord::DirectoryHeader(dir) => headers.push(dir),
            CatalogRecord::Entry(line) => {
                let dir = headers.last().unwrap();
                let relative = dir.strip_prefix(&headers[0]).unwrap().join(&line.name);
                lines.insert(relative, line);
            }
        }
    }
    (headers, lines)
}

pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_generated_tree_round_trip() {
        let mut harness = BackupHarness::new();
        let files = harness.generate_tree(TreeConfig::default()).unwrap();

        let report = harness.run(PaxcatBuilder::new());
        assert_eq!(report.stats.files, files);

        // Unpack with an independent reader and compare byte for byte
        let restore = TempDir::new().unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&report.archive_path).unwrap()));
        archive.unpack(restore.path()).unwrap();

        let mut compared = 0;
        for entry in WalkDir::new(harness.root()).min_depth(1) {
            let entry = entry.unwrap();
            let relative = entry.path().strip_prefix(harness.root()).unwrap();
            let restored = restore.path().join(relative);
            if entry.file_type().is_file() {
                assert_eq!(fs::read(entry.path()).unwrap(), fs::read(&restored).unwrap());
                compared += 1;
            } else {
                assert!(restored.is_dir(), "{:?} missing after unpack", relative);
            }
        }
        assert_eq!(compared, files);
        assert!(logs_contain("Generated"));
    }

    #[test]
    fn test_archive_catalog_and_tree_name_the_same_paths() {
        let mut harness = BackupHarness::new();
        harness.generate_tree(TreeConfig::default()).unwrap();
        symlink("file_0_0.bin", harness.root().join("link")).unwrap();

        let report = harness.run(PaxcatBuilder::new());

        let on_disk: BTreeSet<PathBuf> = WalkDir::new(harness.root())
            .min_depth(1)
            .into_iter()
            .map(|e| e.unwrap().path().strip_prefix(harness.root()).unwrap().to_path_buf())
            .collect();
        let archived: BTreeSet<PathBuf> = read_archive(&report.archive_path)
            .into_iter()
            .map(|m| m.path)
            .collect();
        let (_, catalog) = read_catalog_file(&report.catalog_path);
        let cataloged: BTreeSet<PathBuf> = catalog.keys().cloned().collect();

        assert_eq!(archived, on_disk);
        assert_eq!(cataloged, on_disk);
        assert_eq!(report.stats.members(), on_disk.len());
    }

    #[test]
    fn test_hello_world_catalog_line() {
        let harness = BackupHarness::new();
        let hello = harness.write_file("hello.txt", b"world");
        let mtime = filetime::FileTime::from_unix_time(1_700_000_000, 0);
        filetime::set_file_mtime(&hello, mtime).unwrap();

        let report = harness.run(PaxcatBuilder::new());

        let catalog = fs::read_to_string(&report.catalog_path).unwrap();
        let expected = format!(
            "\t{}\n-rw-r--r--\t7c211433f02071597741e6ff5a8ea34789abbf43\t5\t2023-11-14 22:13:20\thello.txt\n",
            report.source_dir.display()
        );
        assert_eq!(catalog, expected);

        let members = read_archive(&report.archive_path);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].path, PathBuf::from("hello.txt"));
        assert_eq!(members[0].content, b"world");
        assert_eq!(members[0].mode, 0o644);
    }

    #[test]
    fn test_symlink_is_archived_not_followed() {
        let harness = BackupHarness::new();
        symlink("/etc/passwd", harness.root().join("passwd")).unwrap();

        let report = harness.run(PaxcatBuilder::new());

        let members = read_archive(&report.archive_path);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].entry_type, tar::EntryType::Symlink);
        assert_eq!(members[0].link_target, Some(PathBuf::from("/etc/passwd")));
        assert!(members[0].content.is_empty());

        let (_, catalog) = read_catalog_file(&report.catalog_path);
        let line = &catalog[Path::new("passwd")];
        assert!(line.permissions.starts_with('l'));
        assert!(line.digest.is_placeholder());
        assert_eq!(line.size, None);
        assert_eq!(report.stats.symlinks, 1);
    }

    #[test]
    fn test_symlinked_directory_is_not_descended() {
        let harness = BackupHarness::new();
        harness.write_file("real/inside.txt", b"inside");
        symlink("real", harness.root().join("alias")).unwrap();

        let report = harness.run(PaxcatBuilder::new().sort_entries(true));

        let paths: Vec<PathBuf> = read_archive(&report.archive_path)
            .into_iter()
            .map(|m| m.path)
            .collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("alias"),
                PathBuf::from("real"),
                PathBuf::from("real/inside.txt"),
            ]
        );
        assert_eq!(report.stats.directories_processed, 2);
    }

    #[test]
    fn test_fifo_is_skipped() {
        let harness = BackupHarness::new();
        harness.write_file("keep.txt", b"keep");
        let fifo = harness.root().join("pipe");
        let c_path = std::ffi::CString::new(fifo.to_str().unwrap()).unwrap();
        assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) }, 0);

        let report = harness.run(PaxcatBuilder::new());

        assert_eq!(report.stats.skipped, 1);
        let members = read_archive(&report.archive_path);
        assert_eq!(members.len(), 1);
        let (_, catalog) = read_catalog_file(&report.catalog_path);
        assert!(!catalog.contains_key(Path::new("pipe")));
    }

    #[test]
    fn test_empty_source_directory() {
        let harness = BackupHarness::new();

        let report = harness.run(PaxcatBuilder::new());

        assert!(read_archive(&report.archive_path).is_empty());
        let catalog = fs::read_to_string(&report.catalog_path).unwrap();
        assert_eq!(catalog, format!("\t{}\n", report.source_dir.display()));
        assert_eq!(report.stats.directories_processed, 1);
    }

    #[test]
    fn test_breadth_first_header_order() {
        let harness = BackupHarness::new();
        harness.write_file("a/c/deep.txt", b"deep");
        harness.write_file("a/inner.txt", b"inner");
        harness.write_file("b.txt", b"b");
        fs::create_dir(harness.root().join("z")).unwrap();

        let report = harness.run(PaxcatBuilder::new().sort_entries(true));

        let (headers, _) = read_catalog_file(&report.catalog_path);
        let root = &report.source_dir;
        assert_eq!(
            headers,
            vec![root.clone(), root.join("a"), root.join("z"), root.join("a/c")]
        );

        let paths: Vec<PathBuf> = read_archive(&report.archive_path)
            .into_iter()
            .map(|m| m.path)
            .collect();
        assert_eq!(
            paths,
            ["a", "b.txt", "z", "a/c", "a/inner.txt", "a/c/deep.txt"]
                .iter()
                .map(PathBuf::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_digests_match_archived_content() {
        let mut harness = BackupHarness::new();
        // Several files larger than the relay's in-flight window
        for i in 0..3 {
            let size = 200_000 + i * 4096 + 17;
            let content: Vec<u8> = (0..size).map(|_| harness.rng.random()).collect();
            harness.write_file(&format!("big_{}.bin", i), &content);
        }
        harness.write_file("empty.txt", b"");

        let report = harness.run(PaxcatBuilder::new().compression_level(1));

        let (_, catalog) = read_catalog_file(&report.catalog_path);
        for member in read_archive(&report.archive_path) {
            let line = &catalog[&member.path];
            assert_eq!(line.digest.to_hex(), sha1_hex(&member.content));
            assert_eq!(line.size, Some(member.content.len() as u64));
        }
        assert_eq!(
            catalog[Path::new("empty.txt")].digest.to_hex(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn test_long_and_unicode_names_survive() {
        let harness = BackupHarness::new();
        let deep = format!("{}/{}", "d".repeat(60), "e".repeat(60));
        harness.write_file(&format!("{}/{}.txt", deep, "f".repeat(80)), b"long");
        harness.write_file("naïve ünïcödé.txt", b"unicode");

        let report = harness.run(PaxcatBuilder::new());

        let paths: BTreeSet<PathBuf> = read_archive(&report.archive_path)
            .into_iter()
            .map(|m| m.path)
            .collect();
        assert!(paths.contains(&PathBuf::from(format!("{}/{}.txt", deep, "f".repeat(80)))));
        assert!(paths.contains(&PathBuf::from("naïve ünïcödé.txt")));

        let verification = verify_backup(&report.archive_path, &report.catalog_path).unwrap();
        assert!(verification.is_valid(), "{}", verification.summary());
    }

    #[test]
    fn test_newline_in_name_keeps_one_line_per_entry() {
        let harness = BackupHarness::new();
        harness.write_file("a\nb", b"two\nlines");

        let report = harness.run(PaxcatBuilder::new());

        let catalog = fs::read_to_string(&report.catalog_path).unwrap();
        let data_lines = catalog.lines().filter(|l| !l.starts_with('\t')).count();
        let members = read_archive(&report.archive_path);
        assert_eq!(members.len(), 1);
        assert_eq!(data_lines, members.len());
        assert!(catalog.ends_with("\ta\\nb\n"), "Unexpected catalog: {:?}", catalog);

        let (_, lines) = read_catalog_file(&report.catalog_path);
        assert!(lines.contains_key(Path::new("a\nb")));

        let verification = verify_backup(&report.archive_path, &report.catalog_path).unwrap();
        assert!(verification.is_valid(), "{}", verification.summary());
    }

    #[test]
    fn test_non_utf8_name_verifies() {
        let harness = BackupHarness::new();
        let name = OsStr::from_bytes(b"bad\xffname");
        fs::write(harness.root().join(name), b"bytes").unwrap();

        let report = harness.run(PaxcatBuilder::new());

        let catalog = fs::read_to_string(&report.catalog_path).unwrap();
        assert!(catalog.contains("\tbad\\xffname\n"), "Unexpected catalog: {:?}", catalog);
        assert!(!catalog.contains('\u{fffd}'));

        let members = read_archive(&report.archive_path);
        assert_eq!(members[0].path.as_os_str(), name);

        let verification = verify_backup(&report.archive_path, &report.catalog_path).unwrap();
        assert!(verification.is_valid(), "{}", verification.summary());
        assert_eq!(verification.members_checked, 1);
    }

    #[test]
    fn test_special_permission_bits_in_catalog() {
        let harness = BackupHarness::new();
        let tool = harness.write_file("tool", b"#!/bin/sh\n");
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o4755)).unwrap();
        let shared = harness.root().join("shared");
        fs::create_dir(&shared).unwrap();
        fs::set_permissions(&shared, fs::Permissions::from_mode(0o1777)).unwrap();

        let report = harness.run(PaxcatBuilder::new());

        let (_, catalog) = read_catalog_file(&report.catalog_path);
        assert_eq!(catalog[Path::new("tool")].permissions, "-rwsr-xr-x");
        assert_eq!(catalog[Path::new("shared")].permissions, "drwxrwxrwt");
    }

    #[test]
    fn test_verification_detects_tampering() {
        let harness = BackupHarness::new();
        harness.write_file("hello.txt", b"world");
        harness.write_file("other.txt", b"other");

        let paxcat = harness.paxcat(PaxcatBuilder::new());
        let report = paxcat.run().unwrap();
        assert!(paxcat.verify().unwrap().is_valid());

        let original = fs::read_to_string(&report.catalog_path).unwrap();

        // Wrong digest
        let tampered = original.replace(
            "7c211433f02071597741e6ff5a8ea34789abbf43",
            "0123456789abcdef0123456789abcdef01234567",
        );
        fs::write(&report.catalog_path, &tampered).unwrap();
        let verification = paxcat.verify().unwrap();
        assert!(!verification.is_valid());
        assert!(verification
            .issues
            .iter()
            .any(|i| matches!(i, VerificationIssue::DigestMismatch { .. })));

        // Dropped line
        let dropped: String = original
            .lines()
            .filter(|l| !l.ends_with("\tother.txt"))
            .map(|l| format!("{}\n", l))
            .collect();
        fs::write(&report.catalog_path, dropped).unwrap();
        let verification = paxcat.verify().unwrap();
        assert_eq!(
            verification.issues,
            vec![VerificationIssue::MissingFromCatalog(PathBuf::from("other.txt"))]
        );
    }

    #[test]
    fn test_unreadable_subdirectory_aborts_run() {
        // Permission bits do not apply to root
        if unsafe { libc::geteuid() } == 0 {
            return;
        }
        let harness = BackupHarness::new();
        harness.write_file("locked/secret.txt", b"secret");
        let locked = harness.root().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let result = harness.paxcat(PaxcatBuilder::new()).run();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        match result {
            Err(PaxcatError::SourceRead { path, .. }) => assert!(path.ends_with("locked")),
            other => panic!("unexpected result {:?}", other.map(|r| r.stats)),
        }
    }

    #[test]
    fn test_output_inside_source_is_rejected() {
        let harness = BackupHarness::new();
        let err = PaxcatBuilder::new()
            .build(harness.root(), harness.root().join("backup"))
            .unwrap_err();
        assert!(matches!(err, PaxcatError::Validation(_)));
        assert!(!harness.root().join("backup.pax.gz").exists());
    }
}
