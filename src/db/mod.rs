//! The versioned authoritative zone database.
//!
//! A [`ZoneDb`] is an in-memory store answering DNS lookups against a
//! zone while loads, updates, and DNSSEC maintenance proceed next to
//! them. Readers attach to a committed version and see it unchanged for
//! the lifetime of their handle; a single writer stacks new slab headers
//! above the per-node history chains and publishes them atomically.
//!
//! Locking is layered: a database lock for attribute bits and the
//! current-version pointer, a tree lock for topology, a fixed set of
//! node-lock partitions for header chains and reference counts, and a
//! per-version lock for its metadata, acquired strictly in that order.

pub mod find;
pub mod glue;
pub mod load;
pub mod node;
pub mod resign;
pub mod version;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{RwLock, RwLockWriteGuard};

use crate::base::{Class, Name, Rtype, TypePair};
use crate::runtime::Runtime;
use crate::slab::{RdataSlab, SlabError, SubtractOutcome};
use crate::tree::NameTree;

pub use self::find::{FindAnswer, FindError, FindOpts, FindOutcome};
pub use self::glue::{AdditionalSection, GlueCacheStats};
pub use self::load::{Load, LoadError, Rrset};
pub use self::node::{Node, NodeNsec, Partition, Rdataset};
pub use self::version::{Nsec3Params, VersionError, VersionHandle};

use self::node::{attrs, SlabHeader};
use self::resign::{resign_sooner, Sooner};
use self::version::{Version, VersionMeta, VersionState};

/// The number of node-lock partitions. A power of two.
const NODE_LOCK_COUNT: usize = 8;

/// The zone has finished loading.
pub(crate) const ATTR_LOADED: u8 = 0x01;

/// A load is in progress.
pub(crate) const ATTR_LOADING: u8 = 0x02;

//------------ ZoneKind ------------------------------------------------------

/// What kind of zone the database holds.
///
/// Stub zones keep only the data needed to find the real servers, so
/// their origin NS set acts as a referral rather than an answer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ZoneKind {
    Authoritative,
    Stub,
}

//------------ TreeSet -------------------------------------------------------

/// The three parallel name trees of a zone.
#[derive(Debug)]
pub(crate) struct TreeSet {
    /// All owner names.
    pub main: NameTree<Node>,

    /// Owners that have NSEC records; accelerates closest-NSEC search.
    pub nsec: NameTree<Node>,

    /// Hashed owner names of the NSEC3 chain.
    pub nsec3: NameTree<Node>,

    /// The origin node, materialized at creation.
    pub origin_node: Option<Arc<Node>>,
}

//------------ DbState -------------------------------------------------------

/// State under the database lock: attribute bits and version topology.
#[derive(Debug)]
pub(crate) struct DbState {
    pub attributes: u8,
    pub versions: VersionState,
}

//------------ ZoneDb --------------------------------------------------------

/// A versioned in-memory zone database.
pub struct ZoneDb {
    tag: usize,
    origin: Name,
    class: Class,
    kind: ZoneKind,
    runtime: Arc<Runtime>,

    pub(crate) state: RwLock<DbState>,
    pub(crate) tree: RwLock<TreeSet>,
    pub(crate) node_locks: Vec<RwLock<Partition>>,

    /// Orders headers in the resign heaps; zones sign earliest-first.
    pub(crate) sooner: Sooner,

    pub(crate) glue_stats: OnceLock<Arc<GlueCacheStats>>,
}

impl ZoneDb {
    /// Creates an empty zone database.
    pub fn new(
        runtime: Arc<Runtime>,
        origin: Name,
        class: Class,
        kind: ZoneKind,
    ) -> Self {
        static NEXT_TAG: AtomicUsize = AtomicUsize::new(1);

        let initial = Version::new(1, false, VersionMeta::default());
        let db = ZoneDb {
            tag: NEXT_TAG.fetch_add(1, Ordering::Relaxed),
            origin,
            class,
            kind,
            runtime,
            state: RwLock::new(DbState {
                attributes: 0,
                versions: VersionState::new(initial),
            }),
            tree: RwLock::new(TreeSet {
                main: NameTree::new(),
                nsec: NameTree::new(),
                nsec3: NameTree::new(),
                origin_node: None,
            }),
            node_locks: (0..NODE_LOCK_COUNT)
                .map(|_| RwLock::new(Partition::default()))
                .collect(),
            sooner: resign_sooner,
            glue_stats: OnceLock::new(),
        };

        {
            // The origin is materialized in the main and NSEC3 trees up
            // front so lookups in either always have an ancestor.
            let mut trees = db.tree.write();
            let origin = db.origin.clone();
            let node = db.get_or_create(&mut trees.main, &origin);
            trees.origin_node = Some(node);
            db.get_or_create(&mut trees.nsec3, &origin);
        }
        db
    }

    pub fn origin(&self) -> &Name {
        &self.origin
    }

    pub fn class(&self) -> Class {
        self.class
    }

    pub fn kind(&self) -> ZoneKind {
        self.kind
    }

    /// Returns the origin node.
    pub fn origin_node(&self) -> Arc<Node> {
        self.tree
            .read()
            .origin_node
            .clone()
            .expect("origin node is created with the database")
    }

    /// Returns the number of names in one of the trees.
    pub fn node_count(&self, which: WhichTree) -> usize {
        let trees = self.tree.read();
        match which {
            WhichTree::Main => trees.main.len(),
            WhichTree::Nsec => trees.nsec.len(),
            WhichTree::Nsec3 => trees.nsec3.len(),
        }
    }

    fn require_handle(&self, handle: &VersionHandle) {
        assert_eq!(
            handle.db_tag, self.tag,
            "version handle belongs to a different database"
        );
    }

    //--- version management

    /// Attaches to the current version.
    pub fn current_version(&self) -> VersionHandle {
        let state = self.state.read();
        VersionHandle::new(state.versions.current.clone(), self.tag)
    }

    /// Attaches another handle to the same version.
    pub fn attach_version(&self, handle: &VersionHandle) -> VersionHandle {
        self.require_handle(handle);
        VersionHandle::new(handle.version().clone(), self.tag)
    }

    /// Opens the writable version.
    ///
    /// Only one writer may exist at a time. The new version starts from
    /// the current version's metadata with the next serial.
    pub fn new_version(&self) -> Result<VersionHandle, VersionError> {
        let mut state = self.state.write();
        if state.versions.writer.is_some() {
            return Err(VersionError::WriterActive);
        }
        let current = &state.versions.current;
        let version = Version::new(
            current.serial() + 1,
            true,
            current.meta.read().clone(),
        );
        state.versions.writer = Some(version.clone());
        Ok(VersionHandle::new(version, self.tag))
    }

    /// Closes a version handle.
    ///
    /// Readers detach; when the last reader of a superseded version goes
    /// away, history that no open version can see is reclaimed. A writer
    /// either publishes its version or rolls every edit back.
    pub fn close_version(&self, mut handle: VersionHandle, commit: bool) {
        self.require_handle(&handle);
        handle.closed = true;
        let version = handle.version().clone();

        if version.is_writer() {
            if commit {
                self.commit_version(&version);
            } else {
                self.rollback_version(&version);
            }
            version.detach();
            return;
        }

        version.detach();
        let mut state = self.state.write();
        self.reclaim(&mut state);
    }

    fn commit_version(&self, version: &Arc<Version>) {
        // Re-derive the security state for the data this version will
        // publish: zone key at the apex, active NSEC3 chain.
        self.derive_version_meta(version);

        // Newly installed RESIGN headers enter the partition heaps.
        let changed = version.changed.lock().clone();
        for key in changed {
            let mut partition = self.node_locks[key.node.locknum()].write();
            let Some(head) = partition.find_type_head(&key.node, key.typepair)
            else {
                continue;
            };
            let header = partition.header(head);
            if header.serial == version.serial()
                && header.exists()
                && !header.ignored()
                && header.resigns()
                && header.heap_index == 0
            {
                let Partition { headers, heap } = &mut *partition;
                heap.insert(headers, head, self.sooner);
            }
        }

        let mut state = self.state.write();
        tracing::trace!(
            zone = %self.origin,
            serial = version.serial(),
            "publishing zone version"
        );
        version.clear_writer();
        state.versions.writer = None;
        state.versions.current = version.clone();
        state.versions.open.push(version.clone());
        self.reclaim(&mut state);
    }

    fn rollback_version(&self, version: &Arc<Version>) {
        let serial = version.serial();
        tracing::trace!(
            zone = %self.origin,
            serial,
            "rolling back zone version"
        );

        // Writer headers are always chain heads: mark and unlink them.
        let changed: Vec<_> = version.changed.lock().drain(..).collect();
        for key in changed {
            let mut partition = self.node_locks[key.node.locknum()].write();
            let Some(head) = partition.find_type_head(&key.node, key.typepair)
            else {
                continue;
            };
            if partition.header(head).serial == serial {
                partition.header_mut(head).attributes |= attrs::IGNORE;
                partition.unlink_head(&key.node, head);
            }
        }

        // Headers this writer displaced from the heaps go back in.
        let resigned: Vec<_> = version.resigned.lock().drain(..).collect();
        for key in resigned {
            let mut partition = self.node_locks[key.node.locknum()].write();
            let Some(head) = partition.find_type_head(&key.node, key.typepair)
            else {
                continue;
            };
            let header = partition.header(head);
            if header.resigns() && header.heap_index == 0 && header.exists() {
                let Partition { headers, heap } = &mut *partition;
                heap.insert(headers, head, self.sooner);
            }
        }

        version.glue_stack.lock().clear();

        let mut state = self.state.write();
        state.versions.writer = None;
    }

    /// Reclaims history no open version can observe anymore.
    fn reclaim(&self, state: &mut DbState) {
        let retired = state.versions.take_retired();
        if retired.is_empty() {
            return;
        }
        let least = state.versions.least_serial();
        for version in retired {
            let changed: Vec<_> =
                version.changed.lock().drain(..).collect();
            for key in changed {
                let mut partition =
                    self.node_locks[key.node.locknum()].write();
                partition.prune_node(&key.node, least, self.sooner);
            }

            // Glue computed while this version was current dies with it.
            let glued: Vec<_> =
                version.glue_stack.lock().drain(..).collect();
            for key in glued {
                let mut partition =
                    self.node_locks[key.node.locknum()].write();
                let visible = partition
                    .find_type_head(&key.node, key.typepair)
                    .and_then(|head| {
                        partition.first_visible(head, version.serial())
                    });
                if let Some(slot) = visible {
                    partition.header_mut(slot).glue = OnceLock::new();
                }
            }
        }
    }

    /// Recomputes a version's security metadata from the zone apex.
    pub(crate) fn derive_version_meta(&self, version: &Arc<Version>) {
        let serial = version.serial();
        let (secure, nsec3) = {
            let trees = self.tree.read();
            let Some(origin) = trees.origin_node.clone() else {
                return;
            };
            let partition = self.node_locks[origin.locknum()].read();

            let secure = partition
                .visible_header(&origin, TypePair::exact(Rtype::DNSKEY), serial)
                .map_or(false, |slot| {
                    partition
                        .header(slot)
                        .slab
                        .iter()
                        .any(is_zone_key)
                });

            let nsec3 = partition
                .visible_header(
                    &origin,
                    TypePair::exact(Rtype::NSEC3PARAM),
                    serial,
                )
                .and_then(|slot| {
                    partition
                        .header(slot)
                        .slab
                        .iter()
                        .find_map(parse_nsec3param)
                });
            (secure, nsec3)
        };

        let mut meta = version.meta.write();
        meta.secure = secure;
        meta.nsec3 = nsec3;
    }

    //--- data plane

    /// Installs an rdataset under a version's serial.
    pub(crate) fn install_rrset(
        &self,
        node: &Arc<Node>,
        version: &Arc<Version>,
        rrset: &Rrset,
        merge: bool,
        loading: bool,
    ) -> Result<AddOutcome, AddError> {
        let pair = rrset.typepair();
        let slab =
            RdataSlab::from_records(&rrset.rdatas).map_err(AddError::Slab)?;
        if slab.is_empty() {
            return Err(AddError::Empty);
        }
        let serial = version.serial();

        let mut partition = self.node_locks[node.locknum()].write();
        let old_visible = partition
            .find_type_head(node, pair)
            .and_then(|head| partition.first_visible(head, serial));

        let (final_slab, trust) = match old_visible {
            Some(old_slot) if merge => {
                let old = partition.header(old_slot);
                let trust = old.trust.max(rrset.trust);
                match old.slab.merge(&slab) {
                    crate::slab::MergeOutcome::Unchanged
                        if old.ttl == rrset.ttl =>
                    {
                        return Ok(AddOutcome::Unchanged);
                    }
                    crate::slab::MergeOutcome::Unchanged => {
                        (old.slab.clone(), trust)
                    }
                    crate::slab::MergeOutcome::Merged(merged) => {
                        (merged, trust)
                    }
                }
            }
            _ => (slab, rrset.trust),
        };

        let (old_records, old_xfr) = old_visible
            .map(|slot| {
                let header = partition.header(slot);
                (
                    header.slab.count() as u64,
                    xfr_size(node.name(), &header.slab),
                )
            })
            .unwrap_or((0, 0));

        let mut header = SlabHeader::new(
            pair,
            rrset.ttl,
            trust,
            serial,
            final_slab,
            node.clone(),
        );
        if let Some(time) = rrset.resign {
            header.attributes |= attrs::RESIGN;
            header.resign = (time >> 1) as u32;
            header.resign_lsb = time & 1 == 1;
        }
        let resigns = header.resigns();

        let (slot, shadowed) = partition.install(node, header, self.sooner);
        if let Some(old_slot) = shadowed {
            self.resign_displace(&mut partition, version, old_slot);
        }
        if resigns && loading {
            let Partition { headers, heap } = &mut *partition;
            heap.insert(headers, slot, self.sooner);
        }
        if !loading {
            version.record_change(node, pair);
        }

        let new_header = partition.header(slot);
        let (new_records, new_xfr) = (
            new_header.slab.count() as u64,
            xfr_size(node.name(), &new_header.slab),
        );
        drop(partition);

        let mut meta = version.meta.write();
        meta.records = meta.records + new_records - old_records;
        meta.xfrsize = meta.xfrsize + new_xfr - old_xfr;
        Ok(AddOutcome::Added)
    }

    /// Takes a displaced header out of its heap, remembering it on the
    /// version so rollback can put it back.
    fn resign_displace(
        &self,
        partition: &mut Partition,
        version: &Arc<Version>,
        slot: u32,
    ) {
        let header = partition.header(slot);
        if header.heap_index == 0 {
            return;
        }
        let key = version::HeaderKey {
            node: header.node.clone(),
            typepair: header.typepair,
        };
        let heap_index = header.heap_index;
        let Partition { headers, heap } = partition;
        heap.delete(headers, heap_index, self.sooner);
        version.resigned.lock().push(key);
    }

    /// Adds an rdataset through a writable version.
    pub fn add_rdataset(
        &self,
        node: &Arc<Node>,
        version: &VersionHandle,
        rrset: &Rrset,
        merge: bool,
    ) -> Result<AddOutcome, AddError> {
        self.require_handle(version);
        if !version.is_writer() {
            return Err(AddError::ReadOnly);
        }
        let outcome =
            self.install_rrset(node, version.version(), rrset, merge, false)?;
        if rrset.rtype == Rtype::DNAME
            || (rrset.rtype == Rtype::NS && *node.name() != self.origin)
        {
            node.set_find_callback(true);
        }
        Ok(outcome)
    }

    /// Removes the given records from an rdataset.
    pub fn subtract_rdataset(
        &self,
        node: &Arc<Node>,
        version: &VersionHandle,
        rrset: &Rrset,
    ) -> Result<Subtracted, AddError> {
        self.require_handle(version);
        if !version.is_writer() {
            return Err(AddError::ReadOnly);
        }
        let version = version.version();
        let pair = rrset.typepair();
        let sub =
            RdataSlab::from_records(&rrset.rdatas).map_err(AddError::Slab)?;
        let serial = version.serial();

        let mut partition = self.node_locks[node.locknum()].write();
        let Some(old_slot) = partition
            .find_type_head(node, pair)
            .and_then(|head| partition.first_visible(head, serial))
        else {
            return Ok(Subtracted::NotFound);
        };
        let old = partition.header(old_slot);
        let (old_records, old_xfr) =
            (old.slab.count() as u64, xfr_size(node.name(), &old.slab));

        let (replacement, outcome) = match old.slab.subtract(&sub) {
            SubtractOutcome::Unchanged => {
                return Ok(Subtracted::Unchanged);
            }
            SubtractOutcome::Empty => (
                SlabHeader::nonexistent(pair, serial, node.clone()),
                Subtracted::Removed,
            ),
            SubtractOutcome::Remaining(rest) => (
                SlabHeader::new(
                    pair,
                    old.ttl,
                    old.trust,
                    serial,
                    rest,
                    node.clone(),
                ),
                Subtracted::Remaining,
            ),
        };

        let (slot, shadowed) =
            partition.install(node, replacement, self.sooner);
        if let Some(old_slot) = shadowed {
            self.resign_displace(&mut partition, version, old_slot);
        }
        version.record_change(node, pair);
        let new_header = partition.header(slot);
        let (new_records, new_xfr) = (
            new_header.slab.count() as u64,
            xfr_size(node.name(), &new_header.slab),
        );
        drop(partition);

        let mut meta = version.meta.write();
        meta.records = meta.records + new_records - old_records;
        meta.xfrsize = meta.xfrsize + new_xfr - old_xfr;
        Ok(outcome)
    }

    /// Deletes a whole rdataset in the writable version.
    pub fn delete_rdataset(
        &self,
        node: &Arc<Node>,
        version: &VersionHandle,
        rtype: Rtype,
        covers: Rtype,
    ) -> Result<Subtracted, AddError> {
        self.require_handle(version);
        if !version.is_writer() {
            return Err(AddError::ReadOnly);
        }
        let version = version.version();
        let pair = if rtype == Rtype::RRSIG && covers != Rtype::NONE {
            TypePair::sig(covers)
        } else {
            TypePair::exact(rtype)
        };
        let serial = version.serial();

        let mut partition = self.node_locks[node.locknum()].write();
        let Some(old_slot) = partition
            .find_type_head(node, pair)
            .and_then(|head| partition.first_visible(head, serial))
        else {
            return Ok(Subtracted::NotFound);
        };
        let old = partition.header(old_slot);
        let (old_records, old_xfr) =
            (old.slab.count() as u64, xfr_size(node.name(), &old.slab));

        let (_, shadowed) = partition.install(
            node,
            SlabHeader::nonexistent(pair, serial, node.clone()),
            self.sooner,
        );
        if let Some(old_slot) = shadowed {
            self.resign_displace(&mut partition, version, old_slot);
        }
        version.record_change(node, pair);
        drop(partition);

        let mut meta = version.meta.write();
        meta.records -= old_records;
        meta.xfrsize -= old_xfr;
        Ok(Subtracted::Removed)
    }

    //--- node access

    /// Finds (or with `create`, makes) the node for `name` in the main
    /// tree.
    pub fn find_node(&self, name: &Name, create: bool) -> Option<Arc<Node>> {
        self.find_node_in(name, create, WhichTree::Main)
    }

    /// Finds (or creates) the node for a hashed owner name in the NSEC3
    /// tree.
    pub fn find_nsec3_node(
        &self,
        name: &Name,
        create: bool,
    ) -> Option<Arc<Node>> {
        self.find_node_in(name, create, WhichTree::Nsec3)
    }

    fn find_node_in(
        &self,
        name: &Name,
        create: bool,
        which: WhichTree,
    ) -> Option<Arc<Node>> {
        if !name.is_subdomain(&self.origin) {
            return None;
        }
        {
            let trees = self.tree.read();
            let tree = match which {
                WhichTree::Main => &trees.main,
                WhichTree::Nsec => &trees.nsec,
                WhichTree::Nsec3 => &trees.nsec3,
            };
            if let Some(node) = tree.get(name) {
                return Some(node.clone());
            }
        }
        if !create {
            return None;
        }
        let mut trees = self.tree.write();
        let tree = match which {
            WhichTree::Main => &mut trees.main,
            WhichTree::Nsec => &mut trees.nsec,
            WhichTree::Nsec3 => &mut trees.nsec3,
        };
        let node = self.get_or_create(tree, name);
        if which == WhichTree::Nsec3 {
            node.set_nsec(NodeNsec::Nsec3);
        }
        Some(node)
    }

    /// Looks up one rdataset (and its signature) at a known node.
    pub fn find_rdataset(
        &self,
        node: &Arc<Node>,
        version: Option<&VersionHandle>,
        rtype: Rtype,
        covers: Rtype,
    ) -> Option<(Rdataset, Option<Rdataset>)> {
        assert!(rtype != Rtype::ANY, "use all_rdatasets for ANY");
        let serial = self.resolve_serial(version);

        let pair = if rtype == Rtype::RRSIG && covers != Rtype::NONE {
            TypePair::sig(covers)
        } else {
            TypePair::exact(rtype)
        };
        let sigpair = (covers == Rtype::NONE).then_some(TypePair::sig(rtype));

        let partition = self.node_locks[node.locknum()].read();
        let mut found = None;
        let mut foundsig = None;
        for head in partition.type_heads(node) {
            let Some(slot) = partition.first_visible(head, serial) else {
                continue;
            };
            let header_pair = partition.header(slot).typepair;
            if header_pair == pair {
                found = Some(slot);
            } else if Some(header_pair) == sigpair {
                foundsig = Some(slot);
            }
            if found.is_some() && (foundsig.is_some() || sigpair.is_none()) {
                break;
            }
        }
        found.map(|slot| {
            (
                partition.bind(node, slot),
                foundsig.map(|slot| partition.bind(node, slot)),
            )
        })
    }

    /// Snapshots every rdataset visible at a node in a version.
    pub fn all_rdatasets(
        &self,
        node: &Arc<Node>,
        version: Option<&VersionHandle>,
    ) -> Vec<Rdataset> {
        let serial = self.resolve_serial(version);
        self.node_locks[node.locknum()]
            .read()
            .all_rdatasets(node, serial)
    }

    /// Holds the node's partition lock across a multi-step operation.
    pub fn lock_node(&self, node: &Node) -> NodeGuard<'_> {
        NodeGuard {
            _guard: self.node_locks[node.locknum()].write(),
        }
    }

    /// Drops the derived state attached to one rdataset's header: its
    /// glue cache and its place in the resign heap.
    pub fn delete_data(&self, rdataset: &Rdataset) {
        let mut partition =
            self.node_locks[rdataset.header_ref().locknum].write();
        if !partition.still_bound(rdataset) {
            return;
        }
        let slot = rdataset.header_ref().slot;
        partition.header_mut(slot).glue = OnceLock::new();
        let heap_index = partition.header(slot).heap_index;
        if heap_index != 0 {
            let Partition { headers, heap } = &mut *partition;
            heap.delete(headers, heap_index, self.sooner);
        }
    }

    fn resolve_serial(&self, version: Option<&VersionHandle>) -> u32 {
        match version {
            Some(handle) => {
                self.require_handle(handle);
                handle.serial()
            }
            None => self.state.read().versions.current.serial(),
        }
    }

    //--- zone-wide queries

    /// Returns whether the current version is secure.
    pub fn is_secure(&self) -> bool {
        let current = self.state.read().versions.current.clone();
        let secure = current.meta.read().secure;
        secure
    }

    /// Returns the NSEC3 parameters of a version, if it has a chain.
    pub fn nsec3_parameters(
        &self,
        version: Option<&VersionHandle>,
    ) -> Option<Nsec3Params> {
        let version = match version {
            Some(handle) => {
                self.require_handle(handle);
                handle.version().clone()
            }
            None => self.state.read().versions.current.clone(),
        };
        let meta = version.meta.read();
        meta.nsec3.clone()
    }

    /// Returns `(records, xfrsize)` for a version.
    pub fn size(&self, version: Option<&VersionHandle>) -> (u64, u64) {
        let version = match version {
            Some(handle) => {
                self.require_handle(handle);
                handle.version().clone()
            }
            None => self.state.read().versions.current.clone(),
        };
        let meta = version.meta.read();
        (meta.records, meta.xfrsize)
    }

    //--- resign scheduling

    /// Schedules, reschedules, or unschedules an rdataset's re-signing.
    ///
    /// A zero deadline removes the set from its heap; otherwise the key
    /// is adjusted exactly as far as the heap invariant requires.
    pub fn set_signing_time(&self, rdataset: &Rdataset, resign: u64) {
        let locknum = rdataset.header_ref().locknum;
        let mut partition = self.node_locks[locknum].write();
        if !partition.still_bound(rdataset) {
            return;
        }
        let slot = rdataset.header_ref().slot;

        let old_key = {
            let header = partition.header(slot);
            (header.resign, header.resign_lsb)
        };
        let new_key = ((resign >> 1) as u32, resign & 1 == 1);
        if resign != 0 {
            let header = partition.header_mut(slot);
            header.resign = new_key.0;
            header.resign_lsb = new_key.1;
        }

        let heap_index = partition.header(slot).heap_index;
        let Partition { headers, heap } = &mut *partition;
        if heap_index != 0 {
            debug_assert!(headers[slot as usize].resigns());
            if resign == 0 {
                heap.delete(headers, heap_index, self.sooner);
            } else if new_key < old_key {
                heap.increased(headers, heap_index, self.sooner);
            } else if old_key < new_key {
                heap.decreased(headers, heap_index, self.sooner);
            }
        } else if resign != 0 {
            headers[slot as usize].attributes |= attrs::RESIGN;
            heap.insert(headers, slot, self.sooner);
        }
    }

    /// Returns the rdataset with the earliest re-sign deadline.
    ///
    /// Every partition's heap root is inspected with the partition locks
    /// taken in ascending order, so the winner cannot move while it is
    /// being bound.
    pub fn get_signing_time(&self) -> Option<Rdataset> {
        let guards: Vec<_> =
            self.node_locks.iter().map(|lock| lock.read()).collect();
        let mut best: Option<(usize, u32)> = None;
        for (index, guard) in guards.iter().enumerate() {
            let Some(slot) = guard.heap.peek() else {
                continue;
            };
            best = match best {
                None => Some((index, slot)),
                Some((best_index, best_slot)) => {
                    if (self.sooner)(
                        guard.header(slot),
                        guards[best_index].header(best_slot),
                    ) {
                        Some((index, slot))
                    } else {
                        Some((best_index, best_slot))
                    }
                }
            };
        }
        best.map(|(index, slot)| {
            let node = guards[index].header(slot).node.clone();
            guards[index].bind(&node, slot)
        })
    }
}

impl std::fmt::Debug for ZoneDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneDb")
            .field("origin", &self.origin)
            .field("class", &self.class)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

//------------ NodeGuard -----------------------------------------------------

/// Holds a node's partition write lock; released on drop.
pub struct NodeGuard<'a> {
    _guard: RwLockWriteGuard<'a, Partition>,
}

//------------ WhichTree -----------------------------------------------------

/// Selects one of the three trees.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WhichTree {
    Main,
    Nsec,
    Nsec3,
}

//------------ AddOutcome, Subtracted ----------------------------------------

/// The result of adding an rdataset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddOutcome {
    /// A new header was installed.
    Added,

    /// Every record was already present; nothing changed.
    Unchanged,
}

/// The result of subtracting or deleting an rdataset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Subtracted {
    /// No record matched; nothing changed.
    Unchanged,

    /// Records remain after subtraction.
    Remaining,

    /// The rdataset is gone in the new version.
    Removed,

    /// The rdataset did not exist in this version.
    NotFound,
}

//------------ AddError ------------------------------------------------------

/// An rdataset could not be added.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddError {
    /// The version handle is not the writable version.
    ReadOnly,

    /// The rdataset holds no records.
    Empty,

    /// The records could not be packed into a slab.
    Slab(SlabError),
}

impl std::fmt::Display for AddError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddError::ReadOnly => {
                write!(f, "operation requires the writable version")
            }
            AddError::Empty => write!(f, "rdataset holds no records"),
            AddError::Slab(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for AddError {}

//------------ Free helpers --------------------------------------------------

/// The wire size an rdataset contributes to a zone transfer.
fn xfr_size(owner: &Name, slab: &RdataSlab) -> u64 {
    slab.iter()
        .map(|rdata| (owner.wire_len() + 10 + rdata.len()) as u64)
        .sum()
}

/// Returns whether a DNSKEY rdata is a zone key (RFC 4034: zone-key
/// flag set, protocol 3).
fn is_zone_key(rdata: &[u8]) -> bool {
    rdata.len() >= 4 && rdata[0] & 0x01 != 0 && rdata[2] == 3
}

/// Parses an NSEC3PARAM rdata; only the flagless (active) chain counts.
fn parse_nsec3param(rdata: &[u8]) -> Option<Nsec3Params> {
    if rdata.len() < 5 {
        return None;
    }
    let flags = rdata[1];
    if flags != 0 {
        return None;
    }
    let salt_len = usize::from(rdata[4]);
    if rdata.len() < 5 + salt_len {
        return None;
    }
    Some(Nsec3Params {
        hash: rdata[0],
        flags,
        iterations: u16::from_be_bytes([rdata[2], rdata[3]]),
        salt: rdata[5..5 + salt_len].to_vec(),
    })
}
