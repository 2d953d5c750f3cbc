//! Single-pass hash-and-archive relay
//!
//! A regular file has to be both hashed and written into the archive, and
//! reading it twice would double the disk I/O. The archive writer wants to
//! pull its bytes from a stream with a blocking call, so the two consumers
//! cannot simply share a loop. The relay splits the work:
//!
//! ```text
//!  disk ──read 4 KiB──▶ producer ──update──▶ SHA-1
//!                          │
//!                  bounded channel (RELAY_DEPTH blocks)
//!                          │
//!                          ▼
//!              consumer thread: ArchiveWriter::add_entry(ChannelReader)
//! ```
//!
//! The producer runs on the caller's thread. The consumer is a scoped
//! thread that borrows the archive writer for the duration of one file; the
//! caller is blocked on the join the whole time, so the writer is never
//! touched from two threads at once. A full channel suspends the producer,
//! which bounds memory to `RELAY_DEPTH` blocks regardless of file size.

use crate::archive::ArchiveWriter;
use crate::digest::{Digest, DigestBuilder};
use crate::error::{PaxcatError, Result};
use crate::types::ArchiveMember;
use crossbeam_channel::{bounded, Receiver};
use std::io::{self, Read};
use std::thread;
use tracing::{debug, trace};

/// Block size used to read source files; matches typical disk blocks
pub const RELAY_BLOCK_SIZE: usize = 4096;

/// Number of blocks the conduit holds before the producer waits
pub const RELAY_DEPTH: usize = 16;

/// Read end of the conduit, as seen by the archive writer
///
/// Yields the blocks in the order they were sent and reports end of stream
/// once the producer has dropped its sender and every block was consumed.
pub struct ChannelReader {
    receiver: Receiver<Vec<u8>>,
    block: Vec<u8>,
    pos: usize,
}

impl ChannelReader {
    /// Wrap the receiving side of a block channel
    pub fn new(receiver: Receiver<Vec<u8>>) -> Self {
        Self {
            receiver,
            block: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.block.len() {
            match self.receiver.recv() {
                Ok(block) => {
                    self.block = block;
                    self.pos = 0;
                }
                // Sender gone: end of stream
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.block.len() - self.pos);
        buf[..n].copy_from_slice(&self.block[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Stream `source` into `archive` as `member` while hashing it
///
/// Reads exactly `member.size` bytes from `source`: bytes appended to the
/// file after it was stat'ed are ignored, so the returned digest always
/// describes the archived content. A source that ends early fails with
/// [`PaxcatError::SourceRead`].
///
/// Blocks until the archive writer has returned. A failure on the archive
/// side is reported here, at the join, never lost on the worker thread.
pub fn relay<R, A>(source: R, archive: &mut A, member: &ArchiveMember) -> Result<Digest>
where
    R: Read,
    A: ArchiveWriter + Send,
{
    let (sender, receiver) = bounded::<Vec<u8>>(RELAY_DEPTH);
    let thread_name = format!("relay {}", member.path.display());

    thread::scope(|scope| {
        let consumer = thread::Builder::new()
            .name(thread_name)
            .spawn_scoped(scope, move || {
                let mut reader = ChannelReader::new(receiver);
                archive.add_entry(member, Some(&mut reader))
            })
            .map_err(|e| PaxcatError::internal(format!("cannot start archive task: {}", e)))?;

        let produced = produce(source, member, |block| sender.send(block).is_ok());

        // Producer side closes first so the consumer sees a clean end of stream
        drop(sender);

        let consumed = match consumer.join() {
            Ok(result) => result,
            Err(_) => Err(PaxcatError::internal("archive task panicked")),
        };

        match (produced, consumed) {
            (Ok(digest), Ok(())) => {
                debug!("Relayed {:?} ({} bytes, sha1 {})", member.path, member.size, digest);
                Ok(digest)
            }
            (Ok(_), Err(consumer)) => Err(PaxcatError::RelayConsumer {
                path: member.path.clone(),
                source: Box::new(consumer),
            }),
            (Err(producer), Ok(())) => Err(producer),
            (Err(producer), Err(consumer)) => Err(PaxcatError::RelayAborted {
                path: member.path.clone(),
                producer: Box::new(producer),
                consumer: Box::new(consumer),
            }),
        }
    })
}

/// Read up to `member.size` bytes, hashing and forwarding each block
///
/// `send` returns false once the consumer has stopped listening; reading
/// stops there and the outcome is decided at the join.
fn produce<R, F>(mut source: R, member: &ArchiveMember, mut send: F) -> Result<Digest>
where
    R: Read,
    F: FnMut(Vec<u8>) -> bool,
{
    let mut hasher = DigestBuilder::new();
    let mut remaining = member.size;
    let mut block = vec![0u8; RELAY_BLOCK_SIZE];

    while remaining > 0 {
        let want = block.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = match source.read(&mut block[..want]) {
            Ok(0) => {
                return Err(PaxcatError::source_read(
                    &member.path,
                    io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("file shrank while archiving, {} bytes missing", remaining),
                    ),
                ))
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PaxcatError::source_read(&member.path, e)),
        };

        hasher.update(&block[..n]);
        remaining -= n as u64;
        if !send(block[..n].to_vec()) {
            trace!("Archive task for {:?} stopped listening", member.path);
            break;
        }
    }

    Ok(hasher.finalize())
}
