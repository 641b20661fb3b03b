// SPDX-License-Identifier: MPL-2.0

//! The process-wide filesystem node table (§4.4): every absolute path
//! depkg ever touches is interned exactly once into an arena-backed
//! tree, carrying per-package ownership, diversion and stat-override
//! records, and the run's transient unpack-state flags.

use std::collections::{BTreeSet, HashMap};

use bitflags::bitflags;
use indextree::Arena;
use thiserror::Error;

pub mod diversion;
pub mod path;
pub mod statoverride;

pub use diversion::Diversion;
pub use statoverride::StatOverride;

/// Stable handle to an interned node, valid for the table's lifetime:
/// an arena index rather than a raw pointer, so cross-references stay
/// stable across insertions.
pub type NodeHandle = indextree::NodeId;

bitflags! {
    /// Transient per-session unpack-state flags (§3 `FilesystemNode`).
    /// Cleared by [`Table::reset`]; never persisted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeFlags: u16 {
        const NEW_CONFFILE       = 1 << 0;
        const IN_NEW_ARCHIVE     = 1 << 1;
        const OLD_CONFFILE       = 1 << 2;
        const OBSOLETE_CONFFILE  = 1 << 3;
        const ELIDE_FROM_OTHERS  = 1 << 4;
        const NO_ATOMIC_OVERWRITE = 1 << 5;
        const PLACED_ON_DISK     = 1 << 6;
        const DEFERRED_FSYNC     = 1 << 7;
        const DEFERRED_RENAME    = 1 << 8;
        const FILTERED           = 1 << 9;
    }
}

bitflags! {
    /// Lookup behavior for [`Table::find`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FindFlags: u8 {
        const NONE = 0;
        /// Create the node if it doesn't already exist.
        const CREATE_IF_MISSING = 1 << 0;
    }
}

/// An interned filesystem node. `name` is always in the canonical
/// form produced by [`path::normalize`].
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    owners: BTreeSet<String>,
    divert: Option<Diversion>,
    statoverride: Option<StatOverride>,
    flags: NodeFlags,
    old_hash: Option<String>,
    new_hash: Option<String>,
    /// `(device, inode)` of the on-disk object, if known this session.
    disk_identity: Option<(u64, u64)>,
}

impl Node {
    fn new(name: String) -> Self {
        Self {
            name,
            owners: BTreeSet::new(),
            divert: None,
            statoverride: None,
            flags: NodeFlags::empty(),
            old_hash: None,
            new_hash: None,
            disk_identity: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.owners.iter().map(String::as_str)
    }

    pub fn is_owned_by(&self, package: &str) -> bool {
        self.owners.contains(package)
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    pub fn add_owner(&mut self, package: impl Into<String>) {
        self.owners.insert(package.into());
    }

    pub fn remove_owner(&mut self, package: &str) {
        self.owners.remove(package);
    }

    pub fn divert(&self) -> Option<&Diversion> {
        self.divert.as_ref()
    }

    pub fn set_divert(&mut self, divert: Option<Diversion>) {
        self.divert = divert;
    }

    pub fn statoverride(&self) -> Option<&StatOverride> {
        self.statoverride.as_ref()
    }

    pub fn set_statoverride(&mut self, so: Option<StatOverride>) {
        self.statoverride = so;
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub fn set_flag(&mut self, flag: NodeFlags) {
        self.flags.insert(flag);
    }

    pub fn clear_flag(&mut self, flag: NodeFlags) {
        self.flags.remove(flag);
    }

    pub fn has_flag(&self, flag: NodeFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn old_hash(&self) -> Option<&str> {
        self.old_hash.as_deref()
    }

    pub fn set_old_hash(&mut self, hash: Option<String>) {
        self.old_hash = hash;
    }

    pub fn new_hash(&self) -> Option<&str> {
        self.new_hash.as_deref()
    }

    pub fn set_new_hash(&mut self, hash: Option<String>) {
        self.new_hash = hash;
    }

    pub fn disk_identity(&self) -> Option<(u64, u64)> {
        self.disk_identity
    }

    pub fn set_disk_identity(&mut self, identity: Option<(u64, u64)>) {
        self.disk_identity = identity;
    }
}

/// The starting bucket count of the backing map: a fixed prime, as
/// the original engine's hash table used, so that early growth
/// doesn't immediately trigger a rehash for a typical-size install.
const DEFAULT_BUCKETS: usize = 4099;

/// Process-wide (session-wide) node table. Nodes are allocated in a
/// bump arena and never individually freed; only [`Table::reset`]
/// mutates existing nodes, and only their transient state.
#[derive(Debug)]
pub struct Table {
    arena: Arena<Node>,
    by_path: HashMap<String, NodeHandle>,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Self {
            arena: Arena::with_capacity(DEFAULT_BUCKETS),
            by_path: HashMap::with_capacity(DEFAULT_BUCKETS),
        }
    }

    /// Resolve (and optionally create) the node for `path`. The input
    /// need not be normalized; the lookup key is always the canonical
    /// form.
    pub fn find(&mut self, path: &str, flags: FindFlags) -> Option<NodeHandle> {
        let canonical = path::normalize(path);
        if let Some(handle) = self.by_path.get(&canonical) {
            return Some(*handle);
        }
        if !flags.contains(FindFlags::CREATE_IF_MISSING) {
            return None;
        }
        let handle = self.arena.new_node(Node::new(canonical.clone()));
        self.by_path.insert(canonical, handle);
        Some(handle)
    }

    /// Look up without creating; convenience over `find(path, FindFlags::NONE)`.
    pub fn lookup(&self, path: &str) -> Option<NodeHandle> {
        self.by_path.get(&path::normalize(path)).copied()
    }

    pub fn get(&self, handle: NodeHandle) -> &Node {
        self.arena[handle].get()
    }

    pub fn get_mut(&mut self, handle: NodeHandle) -> &mut Node {
        self.arena[handle].get_mut()
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// Clear every node's transient run-state (flags, hashes, disk
    /// identity) while preserving name, owners, diversion and
    /// stat-override. Called at engine init and between operations
    /// within a session that must not leak prior unpack state.
    pub fn reset(&mut self) {
        for handle in self.by_path.values() {
            let node = self.arena[*handle].get_mut();
            node.flags = NodeFlags::empty();
            node.old_hash = None;
            node.new_hash = None;
            node.disk_identity = None;
        }
    }

    /// Iterate every interned node, in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &Node)> {
        self.by_path.values().map(|handle| (*handle, self.arena[*handle].get()))
    }

    /// Iterate the package ids that own the node at `handle`.
    pub fn owners_of(&self, handle: NodeHandle) -> impl Iterator<Item = &str> {
        self.get(handle).owners()
    }

    /// Verify the table-wide invariant: every stored name is a
    /// canonical absolute path. Violations are fatal internal errors,
    /// never masked.
    pub fn check_invariant(&self) -> Result<(), Error> {
        for (path, handle) in &self.by_path {
            let node = self.arena[*handle].get();
            if node.name != *path || !node.name.starts_with('/') || node.name.contains("//") {
                return Err(Error::NonCanonicalName(node.name.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("internal invariant violated: non-canonical node name {0:?}")]
    NonCanonicalName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_creates_and_interns() {
        let mut table = Table::new();
        let a = table.find("/usr/bin/x", FindFlags::CREATE_IF_MISSING).unwrap();
        let b = table.find("usr/bin/x", FindFlags::CREATE_IF_MISSING).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.get(a).name(), "/usr/bin/x");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn lookup_without_create_misses() {
        let table = Table::new();
        assert!(table.lookup("/nope").is_none());
    }

    #[test]
    fn ownership_tracking() {
        let mut table = Table::new();
        let node = table.find("/etc/foo.conf", FindFlags::CREATE_IF_MISSING).unwrap();
        table.get_mut(node).add_owner("foo");
        assert!(table.get(node).is_owned_by("foo"));
        assert_eq!(table.get(node).owner_count(), 1);
        table.get_mut(node).remove_owner("foo");
        assert_eq!(table.get(node).owner_count(), 0);
    }

    #[test]
    fn reset_clears_transient_state_only() {
        let mut table = Table::new();
        let node = table.find("/usr/bin/x", FindFlags::CREATE_IF_MISSING).unwrap();
        table.get_mut(node).add_owner("foo");
        table.get_mut(node).set_flag(NodeFlags::PLACED_ON_DISK);
        table.get_mut(node).set_new_hash(Some("abc".to_string()));

        table.reset();

        assert!(table.get(node).is_owned_by("foo"));
        assert!(!table.get(node).has_flag(NodeFlags::PLACED_ON_DISK));
        assert_eq!(table.get(node).new_hash(), None);
    }

    #[test]
    fn invariant_holds_for_normal_use() {
        let mut table = Table::new();
        table.find("/a/b/c", FindFlags::CREATE_IF_MISSING).unwrap();
        table.check_invariant().unwrap();
    }
}
