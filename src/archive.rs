//! Archive container adapter
//!
//! [`ArchiveWriter`] is the seam between the walker and the archive format.
//! The walker hands it one [`ArchiveMember`] at a time, plus a byte stream
//! for regular files, and every call appends exactly one member in call
//! order.
//!
//! [`PaxArchiveWriter`] is the production implementation: a POSIX.1-2001
//! (PAX) tar stream, gzip-compressed. Values that do not fit the fixed
//! ustar header fields (long or non-ASCII names, long owner names, huge
//! sizes and ids, sub-second modification times) travel in a PAX extended
//! header placed right before the member.

use crate::classify::EntryKind;
use crate::error::{PaxcatError, Result};
use crate::types::ArchiveMember;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use tar::{EntryType, Header};
use tracing::{debug, trace};

const USTAR_NAME_LEN: usize = 100;
const USTAR_OWNER_LEN: usize = 32;
/// Largest value the 7-digit octal uid/gid fields hold
const USTAR_MAX_ID: u64 = 0o7777777;
/// Largest value the 11-digit octal size/mtime fields hold
const USTAR_MAX_NUMBER: u64 = 0o77777777777;

/// Default gzip level; matches `gzip -9`
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 9;

/// Capability that appends members to an open archive container
pub trait ArchiveWriter {
    /// Append one member
    ///
    /// Directories and symlinks are called with `source == None`. Regular
    /// files must come with a source, and the call drains exactly
    /// `member.size` bytes from it before returning.
    fn add_entry(&mut self, member: &ArchiveMember, source: Option<&mut dyn Read>) -> Result<()>;

    /// Finalize the container; no members may be added afterwards
    fn finish(&mut self) -> Result<()>;
}

/// Gzip-compressed PAX tar writer
pub struct PaxArchiveWriter<W: Write> {
    builder: tar::Builder<GzEncoder<W>>,
    members: usize,
    finished: bool,
}

impl PaxArchiveWriter<BufWriter<File>> {
    /// Create the archive file at `path`
    ///
    /// Fails if the file already exists; an existing archive is never
    /// overwritten.
    pub fn create(path: &Path, level: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| PaxcatError::archive_write(path, e))?;
        debug!("Opened archive {:?} (gzip level {})", path, level);
        Ok(Self::new(BufWriter::new(file), level))
    }
}

impl<W: Write> PaxArchiveWriter<W> {
    /// Wrap an arbitrary sink
    pub fn new(sink: W, level: u32) -> Self {
        let encoder = GzEncoder::new(sink, Compression::new(level.min(9)));
        Self {
            builder: tar::Builder::new(encoder),
            members: 0,
            finished: false,
        }
    }

    /// Number of members appended so far
    pub fn members(&self) -> usize {
        self.members
    }

    /// Finish the archive and give back the sink
    pub fn into_inner(mut self) -> Result<W> {
        ArchiveWriter::finish(&mut self)?;
        let encoder = self
            .builder
            .into_inner()
            .map_err(|e| PaxcatError::archive_write("", e))?;
        encoder.finish().map_err(|e| PaxcatError::archive_write("", e))
    }

    fn append(&mut self, member: &ArchiveMember, source: Option<&mut dyn Read>) -> io::Result<()> {
        let (header, pax) = build_header(member)?;

        if !pax.is_empty() {
            trace!("PAX records for {:?}: {:?}", member.path, pax.iter().map(|(k, _)| *k).collect::<Vec<_>>());
            self.builder
                .append_pax_extensions(pax.iter().map(|(k, v)| (*k, v.as_slice())))?;
        }

        match (member.kind, source) {
            (EntryKind::File, Some(source)) => {
                self.builder.append(&header, ExactReader::new(source, member.size))
            }
            (EntryKind::Directory | EntryKind::Symlink, None) => {
                self.builder.append(&header, io::empty())
            }
            (kind, source) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "{} member called {} a byte source",
                    kind,
                    if source.is_some() { "with" } else { "without" }
                ),
            )),
        }
    }
}

impl<W: Write> ArchiveWriter for PaxArchiveWriter<W> {
    fn add_entry(&mut self, member: &ArchiveMember, source: Option<&mut dyn Read>) -> Result<()> {
        if self.finished {
            return Err(PaxcatError::archive_write(
                &member.path,
                io::Error::other("archive already finished"),
            ));
        }
        self.append(member, source)
            .map_err(|e| PaxcatError::archive_write(&member.path, e))?;
        self.members += 1;
        trace!("Archived {:?} ({}, {} bytes)", member.path, member.kind, member.size);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.builder
            .finish()
            .and_then(|_| self.builder.get_mut().try_finish())
            .and_then(|_| self.builder.get_mut().get_mut().flush())
            .map_err(|e| PaxcatError::archive_write("", e))?;
        self.finished = true;
        debug!("Archive finished with {} members", self.members);
        Ok(())
    }
}

/// Build the ustar header and the PAX records for a member
fn build_header(member: &ArchiveMember) -> io::Result<(Header, Vec<(&'static str, Vec<u8>)>)> {
    let mut header = Header::new_ustar();
    let mut pax: Vec<(&'static str, Vec<u8>)> = Vec::new();

    let entry_type = match member.kind {
        EntryKind::File => EntryType::Regular,
        EntryKind::Directory => EntryType::Directory,
        EntryKind::Symlink => EntryType::Symlink,
        EntryKind::Other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "only files, directories and symlinks can be archived",
            ))
        }
    };
    header.set_entry_type(entry_type);

    let mut name = member.path.as_os_str().as_bytes().to_vec();
    if member.kind == EntryKind::Directory && !name.ends_with(b"/") {
        name.push(b'/');
    }
    if !fits_ustar(&name, USTAR_NAME_LEN) {
        pax.push(("path", name.clone()));
    }
    copy_truncated(&mut header.as_old_mut().name, &name);

    if let Some(target) = &member.link_target {
        let target = target.as_os_str().as_bytes();
        if !fits_ustar(target, USTAR_NAME_LEN) {
            pax.push(("linkpath", target.to_vec()));
        }
        copy_truncated(&mut header.as_old_mut().linkname, target);
    }

    header.set_mode(member.mode);

    for (key, id) in [("uid", member.uid), ("gid", member.gid)] {
        let stored = if id > USTAR_MAX_ID {
            pax.push((key, id.to_string().into_bytes()));
            0
        } else {
            id
        };
        if key == "uid" {
            header.set_uid(stored);
        } else {
            header.set_gid(stored);
        }
    }

    if let Some(uname) = &member.uname {
        if fits_ustar(uname.as_bytes(), USTAR_OWNER_LEN) {
            header.set_username(uname)?;
        } else {
            pax.push(("uname", uname.as_bytes().to_vec()));
        }
    }
    if let Some(gname) = &member.gname {
        if fits_ustar(gname.as_bytes(), USTAR_OWNER_LEN) {
            header.set_groupname(gname)?;
        } else {
            pax.push(("gname", gname.as_bytes().to_vec()));
        }
    }

    if member.mtime_nsec != 0 || member.mtime < 0 || member.mtime as u64 > USTAR_MAX_NUMBER {
        pax.push(("mtime", format_pax_time(member.mtime, member.mtime_nsec).into_bytes()));
    }
    header.set_mtime(u64::try_from(member.mtime).unwrap_or(0).min(USTAR_MAX_NUMBER));

    if member.size > USTAR_MAX_NUMBER {
        pax.push(("size", member.size.to_string().into_bytes()));
        header.set_size(0);
    } else {
        header.set_size(member.size);
    }

    header.set_cksum();
    Ok((header, pax))
}

fn fits_ustar(value: &[u8], limit: usize) -> bool {
    value.len() <= limit && value.is_ascii()
}

fn copy_truncated(field: &mut [u8], value: &[u8]) {
    let len = value.len().min(field.len());
    field[..len].copy_from_slice(&value[..len]);
    field[len..].fill(0);
}

/// Decimal seconds with the fractional part trimmed, e.g. `1700000000.25`
fn format_pax_time(secs: i64, nsecs: u32) -> String {
    if nsecs == 0 {
        return secs.to_string();
    }
    let fraction = format!("{:09}", nsecs);
    format!("{}.{}", secs, fraction.trim_end_matches('0'))
}

/// Reader that yields exactly `len` bytes of its source or fails
///
/// A source that ends early produces `UnexpectedEof` instead of a silently
/// short member.
pub struct ExactReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> ExactReader<R> {
    /// Limit `inner` to exactly `len` bytes
    pub fn new(inner: R, len: u64) -> Self {
        Self {
            inner,
            remaining: len,
        }
    }
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("byte stream ended {} bytes short", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}
