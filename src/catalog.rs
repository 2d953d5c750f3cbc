//! Human-readable backup catalog
//!
//! The catalog is a tab-separated text companion to the archive. Every
//! archived entry gets exactly one line:
//!
//! ```text
//! -rw-r--r--	7c211433f02071597741e6ff5a8ea34789abbf43	5	2024-05-01 12:00:00	hello.txt
//! drwxr-xr-x	0000000000000000000000000000000000000000	N/A	2024-05-01 12:00:00	sub
//! ```
//!
//! Each directory taken off the work queue is announced by a header line
//! whose first field is empty and whose second field is the directory's
//! absolute path. The lines for the directory's children follow it.
//!
//! ## Escaping
//!
//! Names and header paths are written with `\\`, `\n`, `\r` and `\t`
//! escaped, and bytes that are not valid UTF-8 as `\xNN`, so every entry
//! stays on one line and the exact on-disk name can be recovered. See
//! [`escape_name`] and [`unescape_name`].
//!
//! ## Staging
//!
//! Lines are staged in memory and only reach the sink on [`CatalogWriter::commit`].
//! The walker commits once per directory, after every child has been
//! archived, so a failure halfway through a directory never leaves a header
//! in the sink without the lines that belong to it.

use crate::classify::EntryKind;
use crate::digest::{Digest, PLACEHOLDER_HEX};
use crate::error::{PaxcatError, Result};
use crate::types::Entry;
use chrono::{DateTime, Local, Utc};
use std::ffi::{OsStr, OsString};
use std::io::{BufRead, Write};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Size column value for entries without byte content
pub const SIZE_NOT_APPLICABLE: &str = "N/A";

/// Timestamp layout used in the catalog
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Append-only writer for catalog lines
pub struct CatalogWriter<W: Write> {
    sink: W,
    staged: Vec<String>,
    utc: bool,
    lines_written: usize,
}

impl<W: Write> CatalogWriter<W> {
    /// Create a writer that renders timestamps in local time
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            staged: Vec::new(),
            utc: false,
            lines_written: 0,
        }
    }

    /// Render timestamps in UTC instead of local time
    pub fn with_utc_timestamps(mut self, utc: bool) -> Self {
        self.utc = utc;
        self
    }

    /// Stage a directory header line
    pub fn write_directory_header(&mut self, path: &Path) {
        self.staged.push(format!("\t{}", escape_name(path.as_os_str())));
    }

    /// Stage one entry line
    ///
    /// A missing digest is written as the all-zero placeholder. The size
    /// column is `N/A` for everything that is not a regular file.
    pub fn write_entry(&mut self, entry: &Entry, digest: Option<&Digest>) {
        let digest = digest.map_or_else(|| PLACEHOLDER_HEX.to_string(), Digest::to_hex);
        let size = match entry.size {
            Some(size) if entry.kind == EntryKind::File => size.to_string(),
            _ => SIZE_NOT_APPLICABLE.to_string(),
        };

        let line = format!(
            "{}\t{}\t{}\t{}\t{}",
            format_mode(entry.mode),
            digest,
            size,
            format_timestamp(entry.mtime, entry.mtime_nsec, self.utc),
            escape_name(entry.name()),
        );
        trace!("Catalog line staged: {}", line);
        self.staged.push(line);
    }

    /// Number of staged lines not yet written
    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    /// Number of lines written to the sink so far
    pub fn lines_written(&self) -> usize {
        self.lines_written
    }

    /// Write all staged lines to the sink and flush it
    pub fn commit(&mut self) -> Result<()> {
        for line in self.staged.drain(..) {
            self.sink
                .write_all(line.as_bytes())
                .and_then(|_| self.sink.write_all(b"\n"))
                .map_err(PaxcatError::CatalogWrite)?;
            self.lines_written += 1;
        }
        self.sink.flush().map_err(PaxcatError::CatalogWrite)
    }

    /// Commit whatever is staged and flush the sink
    pub fn finish(&mut self) -> Result<()> {
        self.commit()
    }

    /// Give back the sink; staged lines that were never committed are dropped
    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// Escape a name or path for a catalog field
///
/// Printable UTF-8 passes through. Backslash, newline, carriage return and
/// tab become two-character escapes; every byte of an invalid UTF-8
/// sequence becomes `\xNN`.
pub fn escape_name(name: &OsStr) -> String {
    let mut out = String::with_capacity(name.len());
    let mut rest = name.as_bytes();

    while !rest.is_empty() {
        let (valid, invalid) = match std::str::from_utf8(rest) {
            Ok(valid) => (valid, &[][..]),
            Err(e) => {
                let (valid, tail) = rest.split_at(e.valid_up_to());
                let bad = e.error_len().unwrap_or(tail.len());
                // valid_up_to() marks the end of a well-formed prefix
                let valid = std::str::from_utf8(valid).unwrap_or_default();
                rest = &tail[bad..];
                (valid, &tail[..bad])
            }
        };
        for c in valid.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c => out.push(c),
            }
        }
        for byte in invalid {
            out.push_str(&format!("\\x{:02x}", byte));
        }
        if invalid.is_empty() {
            break;
        }
    }
    out
}

/// Reverse [`escape_name`]
///
/// Returns `None` for a dangling backslash or an unknown escape.
pub fn unescape_name(field: &str) -> Option<OsString> {
    let mut out = Vec::with_capacity(field.len());
    let mut chars = field.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next()? {
            '\\' => out.push(b'\\'),
            'n' => out.push(b'\n'),
            'r' => out.push(b'\r'),
            't' => out.push(b'\t'),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                if hex.len() != 2 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                    return None;
                }
                out.push(u8::from_str_radix(&hex, 16).ok()?);
            }
            _ => return None,
        }
    }
    Some(OsString::from_vec(out))
}

/// Render `st_mode` the way `ls -l` does, e.g. `drwxr-xr-x`
pub fn format_mode(mode: u32) -> String {
    let file_type = match mode & libc::S_IFMT as u32 {
        m if m == libc::S_IFLNK as u32 => 'l',
        m if m == libc::S_IFSOCK as u32 => 's',
        m if m == libc::S_IFREG as u32 => '-',
        m if m == libc::S_IFBLK as u32 => 'b',
        m if m == libc::S_IFDIR as u32 => 'd',
        m if m == libc::S_IFCHR as u32 => 'c',
        m if m == libc::S_IFIFO as u32 => 'p',
        _ => '?',
    };

    let mut out = String::with_capacity(10);
    out.push(file_type);
    out.push(if mode & 0o400 != 0 { 'r' } else { '-' });
    out.push(if mode & 0o200 != 0 { 'w' } else { '-' });
    out.push(match (mode & 0o4000 != 0, mode & 0o100 != 0) {
        (true, true) => 's',
        (true, false) => 'S',
        (false, true) => 'x',
        (false, false) => '-',
    });
    out.push(if mode & 0o040 != 0 { 'r' } else { '-' });
    out.push(if mode & 0o020 != 0 { 'w' } else { '-' });
    out.push(match (mode & 0o2000 != 0, mode & 0o010 != 0) {
        (true, true) => 's',
        (true, false) => 'S',
        (false, true) => 'x',
        (false, false) => '-',
    });
    out.push(if mode & 0o004 != 0 { 'r' } else { '-' });
    out.push(if mode & 0o002 != 0 { 'w' } else { '-' });
    out.push(match (mode & 0o1000 != 0, mode & 0o001 != 0) {
        (true, true) => 't',
        (true, false) => 'T',
        (false, true) => 'x',
        (false, false) => '-',
    });
    out
}

/// Render a modification time as `YYYY-MM-DD HH:MM:SS`
///
/// Sub-second precision is truncated, not rounded.
pub fn format_timestamp(secs: i64, nsecs: u32, utc: bool) -> String {
    let ts: DateTime<Utc> = DateTime::from_timestamp(secs, nsecs).unwrap_or_default();
    if utc {
        ts.format(TIMESTAMP_FORMAT).to_string()
    } else {
        ts.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string()
    }
}

/// One parsed entry line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogLine {
    /// `ls -l` style permission string
    pub permissions: String,
    /// Content digest, placeholder for non-files
    pub digest: Digest,
    /// Size in bytes; `None` when the column reads `N/A`
    pub size: Option<u64>,
    /// Formatted modification time
    pub timestamp: String,
    /// Final path component, unescaped
    pub name: OsString,
}

impl CatalogLine {
    /// Entry kind implied by the permission string's type character
    pub fn kind(&self) -> EntryKind {
        match self.permissions.chars().next() {
            Some('l') => EntryKind::Symlink,
            Some('d') => EntryKind::Directory,
            Some('-') => EntryKind::File,
            _ => EntryKind::Other,
        }
    }
}

/// One parsed catalog line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogRecord {
    /// Start of a directory's block
    DirectoryHeader(PathBuf),
    /// An archived entry
    Entry(CatalogLine),
}

impl CatalogRecord {
    /// Parse one line; `line_no` is only used for error messages
    pub fn parse(line_no: usize, line: &str) -> Result<Self> {
        let parse_err = |reason: &str| PaxcatError::CatalogParse {
            line: line_no,
            reason: reason.to_string(),
        };

        if let Some(path) = line.strip_prefix('\t') {
            if path.is_empty() {
                return Err(parse_err("directory header without a path"));
            }
            let path = unescape_name(path).ok_or_else(|| parse_err("bad escape in directory path"))?;
            return Ok(CatalogRecord::DirectoryHeader(PathBuf::from(path)));
        }

        let fields: Vec<&str> = line.splitn(5, '\t').collect();
        let [permissions, digest, size, timestamp, name] = fields[..] else {
            return Err(parse_err("expected 5 tab-separated fields"));
        };

        if permissions.chars().count() != 10 {
            return Err(parse_err("permission string must be 10 characters"));
        }
        let digest: Digest = digest
            .parse()
            .map_err(|_| parse_err("digest must be 40 hex characters"))?;
        let size = match size {
            SIZE_NOT_APPLICABLE => None,
            value => Some(
                value
                    .parse::<u64>()
                    .map_err(|_| parse_err("size must be a byte count or N/A"))?,
            ),
        };

        let name = unescape_name(name).ok_or_else(|| parse_err("bad escape in name"))?;

        Ok(CatalogRecord::Entry(CatalogLine {
            permissions: permissions.to_string(),
            digest,
            size,
            timestamp: timestamp.to_string(),
            name,
        }))
    }
}

/// Parse a whole catalog
pub fn read_catalog<R: BufRead>(reader: R) -> Result<Vec<CatalogRecord>> {
    reader
        .lines()
        .enumerate()
        .map(|(idx, line)| CatalogRecord::parse(idx + 1, &line?))
        .collect()
}
