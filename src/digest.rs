//! SHA-1 content digests
//!
//! Every regular file in a backup gets a 160-bit SHA-1 digest of its raw
//! bytes, computed while the bytes stream into the archive. Entries without
//! byte content (directories, symlinks) are recorded with an all-zero
//! placeholder of the same width so the catalog columns stay aligned.
//!
//! ## Example
//!
//! ```rust
//! use paxcat::digest::{hash_data, Digest};
//!
//! let digest = hash_data(b"world");
//! assert_eq!(digest.to_hex(), "7c211433f02071597741e6ff5a8ea34789abbf43");
//! assert!(Digest::PLACEHOLDER.is_placeholder());
//! ```

use crate::error::{PaxcatError, Result};
use serde::{Deserialize, Serialize};
use sha1::{Digest as _, Sha1};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Length of a SHA-1 digest in bytes
pub const DIGEST_LEN: usize = 20;

/// Hex form of the placeholder digest
pub const PLACEHOLDER_HEX: &str = "0000000000000000000000000000000000000000";

/// A SHA-1 digest of a file's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// All-zero digest used for entries that have no byte content
    pub const PLACEHOLDER: Digest = Digest([0u8; DIGEST_LEN]);

    /// Wrap raw digest bytes
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Digest(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase 40-character hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Whether this is the all-zero placeholder
    pub fn is_placeholder(&self) -> bool {
        self.0 == [0u8; DIGEST_LEN]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = PaxcatError;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| PaxcatError::internal(format!("invalid digest {:?}: {}", s, e)))?;
        Ok(Digest(bytes))
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_hex()
    }
}

impl TryFrom<String> for Digest {
    type Error = PaxcatError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Incremental SHA-1 accumulator
#[derive(Default, Clone)]
pub struct DigestBuilder {
    hasher: Sha1,
}

impl DigestBuilder {
    /// Start an empty digest
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one block of bytes
    pub fn update(&mut self, block: &[u8]) {
        self.hasher.update(block);
    }

    /// Finish and return the digest
    pub fn finalize(self) -> Digest {
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(&self.hasher.finalize());
        Digest(bytes)
    }
}

/// Hash arbitrary in-memory data
pub fn hash_data(data: &[u8]) -> Digest {
    let mut builder = DigestBuilder::new();
    builder.update(data);
    builder.finalize()
}

/// Hash everything a reader yields
///
/// Used to hash archive members during verification, where the bytes come
/// out of the decompressor rather than from disk.
pub fn hash_reader<R: Read>(mut reader: R) -> std::io::Result<(Digest, u64)> {
    let mut builder = DigestBuilder::new();
    let mut buffer = vec![0u8; 8192];
    let mut total = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        builder.update(&buffer[..bytes_read]);
        total += bytes_read as u64;
    }

    Ok((builder.finalize(), total))
}

/// Hash a file's content from disk
///
/// This is an independent second read of the file. The backup itself never
/// calls it; it exists for verification and tests.
pub fn hash_file_content(path: &Path) -> Result<Digest> {
    let file = File::open(path).map_err(|e| PaxcatError::source_read(path, e))?;
    let (digest, _) = hash_reader(file).map_err(|e| PaxcatError::source_read(path, e))?;
    Ok(digest)
}
