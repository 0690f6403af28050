//! Loading a zone into the database.
//!
//! A load feeds rdatasets into the initial version (serial 1) one owner
//! at a time. Besides installing slabs this is where the tree grows its
//! structure: wildcard ancestors get their `wild` bits, NSEC owners get
//! twins in the auxiliary tree, NSEC3 owners go into their own tree, and
//! delegation owners are flagged for the lookup engine's chain scan.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::base::{Name, Rtype, Trust, TypePair};
use crate::slab::SlabError;

use super::node::{Node, NodeNsec};
use super::{AddError, TreeSet, ZoneDb, ATTR_LOADED, ATTR_LOADING};

//------------ Rrset ---------------------------------------------------------

/// An rdataset on its way into the database.
#[derive(Clone, Debug)]
pub struct Rrset {
    pub rtype: Rtype,

    /// The covered type for RRSIG sets, `Rtype::NONE` otherwise.
    pub covers: Rtype,

    pub ttl: u32,
    pub trust: Trust,

    /// Raw rdata, one entry per record.
    pub rdatas: Vec<Vec<u8>>,

    /// The re-sign deadline, for sets maintained by the signer.
    pub resign: Option<u64>,
}

impl Rrset {
    pub fn new(rtype: Rtype, ttl: u32) -> Self {
        Rrset {
            rtype,
            covers: Rtype::NONE,
            ttl,
            trust: Trust::Ultimate,
            rdatas: Vec::new(),
            resign: None,
        }
    }

    pub fn sig(covers: Rtype, ttl: u32) -> Self {
        Rrset {
            rtype: Rtype::RRSIG,
            covers,
            ttl,
            trust: Trust::Ultimate,
            rdatas: Vec::new(),
            resign: None,
        }
    }

    pub fn push_rdata(&mut self, rdata: &[u8]) -> &mut Self {
        self.rdatas.push(rdata.to_vec());
        self
    }

    pub fn typepair(&self) -> TypePair {
        if self.rtype == Rtype::RRSIG && self.covers != Rtype::NONE {
            TypePair::sig(self.covers)
        } else {
            TypePair::exact(self.rtype)
        }
    }

    /// Whether this set belongs to the NSEC3 tree.
    fn is_nsec3(&self) -> bool {
        self.rtype == Rtype::NSEC3 || self.covers == Rtype::NSEC3
    }
}

//------------ Load ----------------------------------------------------------

/// An in-progress zone load.
///
/// Created by [`ZoneDb::begin_load`]; data becomes servable once
/// [`finish`] runs. Dropping an unfinished load leaves the database in
/// the loading state with whatever made it in, the same way an aborted
/// load does in the original; callers that want a clean slate create a
/// fresh database.
///
/// [`finish`]: Load::finish
pub struct Load<'a> {
    db: &'a ZoneDb,
    finished: bool,
}

impl<'a> Load<'a> {
    pub(super) fn new(db: &'a ZoneDb) -> Self {
        Load {
            db,
            finished: false,
        }
    }

    /// Adds one rdataset for `owner`.
    pub fn add(&self, owner: &Name, rrset: &Rrset) -> Result<(), LoadError> {
        let db = self.db;

        if rrset.rtype == Rtype::SOA && *owner != db.origin {
            return Err(LoadError::NotZoneTop);
        }
        if !owner.is_subdomain(&db.origin) {
            return Err(LoadError::OutOfZone);
        }

        let node = {
            let mut trees = db.tree.write();

            if !rrset.is_nsec3() {
                db.add_wildcards(&mut trees, owner)?;
            }

            if owner.is_wildcard() {
                if rrset.rtype == Rtype::NS {
                    return Err(LoadError::InvalidNs);
                }
                if rrset.rtype == Rtype::NSEC3 {
                    return Err(LoadError::InvalidNsec3);
                }
                db.wildcard_magic(&mut trees, owner);
            }

            if rrset.is_nsec3() {
                let node = db.get_or_create(&mut trees.nsec3, owner);
                node.set_nsec(NodeNsec::Nsec3);
                node
            } else {
                db.load_node(&mut trees, owner, rrset.rtype == Rtype::NSEC)
            }
        };

        let version = db.state.read().versions.current.clone();
        db.install_rrset(&node, &version, rrset, true, true)?;

        if rrset.rtype.is_delegating()
            && !(rrset.rtype == Rtype::NS && *owner == db.origin)
        {
            node.set_find_callback(true);
        }
        Ok(())
    }

    /// Completes the load, making the zone servable.
    pub fn finish(mut self) -> Result<(), LoadError> {
        self.finished = true;
        let db = self.db;

        {
            let mut state = db.state.write();
            debug_assert!(state.attributes & ATTR_LOADING != 0);
            state.attributes &= !ATTR_LOADING;
            state.attributes |= ATTR_LOADED;
        }

        // A zone key at the apex makes the initial version secure, and
        // an NSEC3PARAM there selects the active NSEC3 chain.
        let version = db.state.read().versions.current.clone();
        db.derive_version_meta(&version);
        Ok(())
    }
}

impl<'a> Drop for Load<'a> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(zone = %self.db.origin, "zone load abandoned");
        }
    }
}

//--- impl ZoneDb: load-side tree growth

impl ZoneDb {
    /// Starts loading the zone.
    pub fn begin_load(&self) -> Result<Load<'_>, LoadError> {
        let mut state = self.state.write();
        if state.attributes & ATTR_LOADING != 0 {
            return Err(LoadError::AlreadyLoading);
        }
        if state.attributes & ATTR_LOADED != 0 {
            return Err(LoadError::AlreadyLoaded);
        }
        state.attributes |= ATTR_LOADING;
        drop(state);
        Ok(Load::new(self))
    }

    /// Fetches or creates a node in `tree`.
    pub(super) fn get_or_create(
        &self,
        tree: &mut crate::tree::NameTree<Node>,
        name: &Name,
    ) -> Arc<Node> {
        if let Some(node) = tree.get(name) {
            return node.clone();
        }
        let locknum = self
            .runtime
            .name_locknum(name, self.node_locks.len());
        let node = Node::new(name.clone(), locknum);
        tree.insert(name, node.clone())
            .expect("checked for absence");
        node
    }

    /// Applies wildcard magic for `wname`: its parent is created if
    /// necessary and flagged as a wildcard parent.
    pub(super) fn wildcard_magic(&self, trees: &mut TreeSet, wname: &Name) {
        let parent = wname.parent().expect("wildcard names have a parent");
        let node = self.get_or_create(&mut trees.main, &parent);
        node.set_nsec(NodeNsec::Normal);
        node.set_find_callback(true);
        node.set_wild(true);
    }

    /// Walks the proper ancestors of `name` below the origin and applies
    /// wildcard magic wherever one of them is a wildcard.
    pub(super) fn add_wildcards(
        &self,
        trees: &mut TreeSet,
        name: &Name,
    ) -> Result<(), LoadError> {
        let labels = name.label_count();
        let origin_labels = self.origin.label_count();
        for depth in origin_labels + 1..labels {
            let ancestor = name
                .strip_left(labels - depth)
                .expect("depth is within the name");
            if ancestor.is_wildcard() {
                self.wildcard_magic(trees, &ancestor);
                let node = self.get_or_create(&mut trees.main, name);
                node.set_nsec(NodeNsec::Normal);
            }
        }
        Ok(())
    }

    /// Fetches or creates a main-tree node, maintaining the auxiliary
    /// NSEC tree when the owner gains an NSEC record.
    pub(super) fn load_node(
        &self,
        trees: &mut TreeSet,
        name: &Name,
        has_nsec: bool,
    ) -> Arc<Node> {
        let node = self.get_or_create(&mut trees.main, name);
        if !has_nsec || node.nsec() == NodeNsec::HasNsec {
            return node;
        }

        if trees.nsec.get(name).is_some() {
            // A twin is already there; recoverable, keep the old one.
            warn!(owner = %name, "NSEC node already exists");
        } else {
            let twin = self.get_or_create(&mut trees.nsec, name);
            twin.set_nsec(NodeNsec::HasNsec);
        }
        node.set_nsec(NodeNsec::HasNsec);
        node
    }
}

//------------ LoadError -----------------------------------------------------

/// Loading failed for one rdataset or for the zone.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadError {
    /// A SOA record appeared somewhere other than the zone origin.
    NotZoneTop,

    /// The owner name is not beneath the zone origin.
    OutOfZone,

    /// A wildcard owner cannot hold an NS rdataset.
    InvalidNs,

    /// A wildcard owner cannot hold an NSEC3 rdataset.
    InvalidNsec3,

    /// A load is already in progress.
    AlreadyLoading,

    /// The zone has already been loaded.
    AlreadyLoaded,

    /// An rdataset could not be encoded.
    Add(AddError),
}

impl From<AddError> for LoadError {
    fn from(err: AddError) -> Self {
        LoadError::Add(err)
    }
}

impl From<SlabError> for LoadError {
    fn from(err: SlabError) -> Self {
        LoadError::Add(AddError::Slab(err))
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::NotZoneTop => {
                write!(f, "SOA is only allowed at the zone origin")
            }
            LoadError::OutOfZone => write!(f, "owner name out of zone"),
            LoadError::InvalidNs => {
                write!(f, "wildcard owners cannot hold NS")
            }
            LoadError::InvalidNsec3 => {
                write!(f, "wildcard owners cannot hold NSEC3")
            }
            LoadError::AlreadyLoading => {
                write!(f, "a load is already in progress")
            }
            LoadError::AlreadyLoaded => {
                write!(f, "the zone has already been loaded")
            }
            LoadError::Add(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for LoadError {}
