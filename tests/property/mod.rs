//! Property-based testing for paxcat
//!
//! Uses proptest to check the archive/catalog invariants over randomly
//! generated source trees and catalog values.

use ::paxcat::catalog::{escape_name, format_mode, CatalogRecord};
use ::paxcat::digest::hash_data;
use ::paxcat::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

use crate::integration::{read_archive, read_catalog_file, sha1_hex};

/// Generate relative file paths, 0 to 3 directories deep
fn path_strategy() -> impl Strategy<Value = PathBuf> {
    let dir_strategy = prop::collection::vec("[a-z]{1,6}", 0..=3);
    let filename_strategy = prop_oneof![
        "file[0-9]{1,3}\\.txt".prop_map(|s| s),
        "[a-z]{3,10}\\.(bin|md)".prop_map(|s| s),
    ];

    (dir_strategy, filename_strategy).prop_map(|(dirs, filename)| {
        let mut path = PathBuf::new();
        for dir in dirs {
            path.push(dir);
        }
        path.join(filename)
    })
}

/// Generate random file content
fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        "[a-zA-Z0-9 \n]{0,500}".prop_map(|s| s.into_bytes()),
        prop::collection::vec(any::<u8>(), 0..70_000),
        (any::<u8>(), 1..10_000usize).prop_map(|(byte, count)| vec![byte; count]),
    ]
}

/// Materialize a tree; paths that collide with an existing directory are dropped
fn build_tree(root: &Path, files: &[(PathBuf, Vec<u8>)]) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut written = BTreeMap::new();
    for (path, content) in files {
        let full = root.join(path);
        if full.parent().map(|p| fs::create_dir_all(p).is_err()).unwrap_or(false) {
            continue;
        }
        if full.is_dir() {
            continue;
        }
        if fs::write(&full, content).is_ok() {
            written.insert(path.clone(), content.clone());
        }
    }
    written
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_catalog_describes_archive(
        files in prop::collection::vec((path_strategy(), content_strategy()), 0..12),
        sort in any::<bool>(),
    ) {
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let written = build_tree(source.path(), &files);

        let paxcat = PaxcatBuilder::new()
            .sort_entries(sort)
            .compression_level(1)
            .build(source.path(), output.path().join("backup"))
            .unwrap();
        let report = paxcat.run().unwrap();
        info!("Archived {} generated files", written.len());

        let members = read_archive(&report.archive_path);
        let (headers, catalog) = read_catalog_file(&report.catalog_path);

        // One catalog line per member, one header per processed directory
        prop_assert_eq!(members.len(), catalog.len());
        prop_assert_eq!(headers.len(), report.stats.directories_processed);
        prop_assert_eq!(report.stats.files, written.len());

        for member in &members {
            let line = catalog.get(&member.path).unwrap();
            match member.entry_type {
                tar::EntryType::Regular => {
                    prop_assert_eq!(line.digest.to_hex(), sha1_hex(&member.content));
                    prop_assert_eq!(line.size, Some(member.content.len() as u64));
                    prop_assert_eq!(&member.content, written.get(&member.path).unwrap());
                }
                _ => {
                    prop_assert!(line.digest.is_placeholder());
                    prop_assert_eq!(line.size, None);
                }
            }
        }

        // A directory's entries all come before any of its subdirectories' entries
        let position: BTreeMap<&Path, usize> = members
            .iter()
            .enumerate()
            .map(|(i, m)| (m.path.as_path(), i))
            .collect();
        for member in &members {
            if let Some(parent) = member.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                prop_assert!(position[parent] < position[member.path.as_path()]);
            }
        }

        prop_assert!(paxcat.verify().unwrap().is_valid());
    }

    #[test]
    fn prop_digest_matches_reference(data in prop::collection::vec(any::<u8>(), 0..20_000)) {
        prop_assert_eq!(hash_data(&data).to_hex(), sha1_hex(&data));
    }

    #[test]
    fn prop_digest_hex_round_trip(bytes in prop::array::uniform20(any::<u8>())) {
        let digest = Digest::from_bytes(bytes);
        let parsed: Digest = digest.to_hex().parse().unwrap();
        prop_assert_eq!(parsed, digest);
    }

    #[test]
    fn prop_mode_string_shape(perm in 0u32..0o10000, kind in 0usize..3) {
        let (type_bits, type_char) = [
            (libc::S_IFREG as u32, '-'),
            (libc::S_IFDIR as u32, 'd'),
            (libc::S_IFLNK as u32, 'l'),
        ][kind];
        let rendered = format_mode(type_bits | perm);

        prop_assert_eq!(rendered.len(), 10);
        prop_assert_eq!(rendered.chars().next(), Some(type_char));
        // Owner read bit always lands in position 1
        prop_assert_eq!(rendered.as_bytes()[1] == b'r', perm & 0o400 != 0);
    }

    #[test]
    fn prop_catalog_line_parses_back(
        size in prop::option::of(any::<u64>()),
        name in "[^/]{1,40}",
    ) {
        let digest = match size {
            Some(_) => hash_data(name.as_bytes()),
            None => Digest::PLACEHOLDER,
        };
        let size_field = size.map(|s| s.to_string()).unwrap_or_else(|| "N/A".to_string());
        let line = format!(
            "-rw-r--r--\t{}\t{}\t2024-01-01 00:00:00\t{}",
            digest,
            size_field,
            escape_name(OsStr::new(&name))
        );
        prop_assert_eq!(line.lines().count(), 1);

        match CatalogRecord::parse(1, &line).unwrap() {
            CatalogRecord::Entry(parsed) => {
                prop_assert_eq!(parsed.digest, digest);
                prop_assert_eq!(parsed.size, size);
                prop_assert_eq!(parsed.name, OsString::from(name));
            }
            other => prop_assert!(false, "parsed as {:?}", other),
        }
    }
}
