//! Hash maps for the owner-name caches and catalog lookups
//!
//! Keys are small (numeric ids, relative paths) and looked up once per
//! entry, so the hasher matters more than the table. With the `gxhash`
//! feature the maps use gxhash, which needs AES-NI/SSE2 (or NEON) at
//! build time; without it they fall back to std's SipHash.

use std::path::PathBuf;

#[cfg(feature = "gxhash")]
type MapHasher = gxhash::GxBuildHasher;

#[cfg(not(feature = "gxhash"))]
type MapHasher = std::collections::hash_map::RandomState;

/// HashMap with the crate's hasher
pub type HashMap<K, V> = std::collections::HashMap<K, V, MapHasher>;

/// Resolved names keyed by uid or gid; `None` caches a failed lookup
pub type IdNameMap = HashMap<u32, Option<String>>;

/// Values keyed by archive member path
pub type PathMap<V> = HashMap<PathBuf, V>;

/// Empty map with the crate's hasher
pub fn new_map<K, V>() -> HashMap<K, V> {
    HashMap::default()
}
