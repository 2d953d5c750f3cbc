//! Best-effort owner name resolution
//!
//! Archive members carry the owner's user and group names next to the
//! numeric ids. Names come from the system user and group databases through
//! `uzers`; an id that does not resolve is simply recorded without a name.
//! Lookups are cached because every entry in a tree usually shares a
//! handful of owners.

use crate::collections::{new_map, IdNameMap};
use tracing::trace;

/// Cached uid/gid to name lookups
pub struct OwnerResolver {
    users: IdNameMap,
    groups: IdNameMap,
}

impl OwnerResolver {
    /// Create a resolver with empty caches
    pub fn new() -> Self {
        Self {
            users: new_map(),
            groups: new_map(),
        }
    }

    /// Name of the user with id `uid`, if it resolves
    pub fn user_name(&mut self, uid: u32) -> Option<String> {
        self.users
            .entry(uid)
            .or_insert_with(|| {
                let name = lookup_user(uid);
                trace!("Resolved uid {} to {:?}", uid, name);
                name
            })
            .clone()
    }

    /// Name of the group with id `gid`, if it resolves
    pub fn group_name(&mut self, gid: u32) -> Option<String> {
        self.groups
            .entry(gid)
            .or_insert_with(|| {
                let name = lookup_group(gid);
                trace!("Resolved gid {} to {:?}", gid, name);
                name
            })
            .clone()
    }
}

impl Default for OwnerResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup_user(uid: u32) -> Option<String> {
    uzers::get_user_by_uid(uid).map(|user| user.name().to_string_lossy().into_owned())
}

fn lookup_group(gid: u32) -> Option<String> {
    uzers::get_group_by_gid(gid).map(|group| group.name().to_string_lossy().into_owned())
}
