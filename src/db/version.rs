//! Versions and version bookkeeping.
//!
//! The database keeps one writable version at most and any number of
//! committed versions that readers still hold. A reader attached to
//! version V observes V for the whole lifetime of its handle; writers
//! stack new headers above the chains and publish them with a single
//! pointer swap. See [`ZoneDb`] for the operations themselves.
//!
//! [`ZoneDb`]: super::ZoneDb

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::base::TypePair;

use super::node::Node;

//------------ Nsec3Params ---------------------------------------------------

/// The NSEC3 parameters a version answers denial proofs with.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Nsec3Params {
    pub hash: u8,
    pub flags: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
}

//------------ VersionMeta ---------------------------------------------------

/// Per-version metadata, guarded by the version lock.
#[derive(Clone, Debug, Default)]
pub(crate) struct VersionMeta {
    /// Number of records visible in this version.
    pub records: u64,

    /// Size of a transfer of this version in wire octets.
    pub xfrsize: u64,

    /// Whether the zone is signed and has its keys at the apex.
    pub secure: bool,

    /// NSEC3 parameters, when the zone has an NSEC3 chain.
    pub nsec3: Option<Nsec3Params>,
}

//------------ HeaderKey -----------------------------------------------------

/// Identifies one rdataset history: a node and a type within it.
///
/// Writer bookkeeping records these instead of raw slots so entries stay
/// meaningful even after the arena reclaims individual headers.
#[derive(Clone, Debug)]
pub(crate) struct HeaderKey {
    pub node: Arc<Node>,
    pub typepair: TypePair,
}

//------------ Version -------------------------------------------------------

/// One version of the zone.
#[derive(Debug)]
pub struct Version {
    serial: u32,
    writer: AtomicBool,
    references: AtomicUsize,

    /// The version lock: record counts and derived security state.
    pub(crate) meta: RwLock<VersionMeta>,

    /// Rdatasets changed by this writer; scanned at commit, pruned at
    /// retirement.
    pub(crate) changed: Mutex<Vec<HeaderKey>>,

    /// RESIGN headers this writer displaced from the heaps; re-inserted
    /// on rollback, forgotten on commit.
    pub(crate) resigned: Mutex<Vec<HeaderKey>>,

    /// Headers whose glue cache was filled while this version was
    /// current; the glue dies with the version.
    pub(crate) glue_stack: Mutex<Vec<HeaderKey>>,
}

impl Version {
    pub(crate) fn new(serial: u32, writer: bool, meta: VersionMeta) -> Arc<Self> {
        Arc::new(Version {
            serial,
            writer: AtomicBool::new(writer),
            references: AtomicUsize::new(0),
            meta: RwLock::new(meta),
            changed: Mutex::new(Vec::new()),
            resigned: Mutex::new(Vec::new()),
            glue_stack: Mutex::new(Vec::new()),
        })
    }

    /// Returns the serial of this version.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Returns whether this is the open writable version.
    pub fn is_writer(&self) -> bool {
        self.writer.load(Ordering::Acquire)
    }

    /// Marks a committed writer as an ordinary readable version.
    pub(crate) fn clear_writer(&self) {
        self.writer.store(false, Ordering::Release)
    }

    pub(crate) fn attach(&self) {
        self.references.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn detach(&self) -> usize {
        let prev = self.references.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0);
        prev - 1
    }

    pub(crate) fn references(&self) -> usize {
        self.references.load(Ordering::Acquire)
    }

    pub(crate) fn record_change(&self, node: &Arc<Node>, typepair: TypePair) {
        self.changed.lock().push(HeaderKey {
            node: node.clone(),
            typepair,
        });
    }
}

//------------ VersionHandle -------------------------------------------------

/// A caller's attachment to one version.
///
/// Handles are closed through [`ZoneDb::close_version`]; dropping one
/// without closing it leaks a reader reference on purpose, so the debug
/// build flags it.
///
/// [`ZoneDb::close_version`]: super::ZoneDb::close_version
#[derive(Debug)]
pub struct VersionHandle {
    pub(crate) version: Arc<Version>,
    pub(crate) db_tag: usize,
    pub(crate) closed: bool,
}

impl VersionHandle {
    pub(crate) fn new(version: Arc<Version>, db_tag: usize) -> Self {
        version.attach();
        VersionHandle {
            version,
            db_tag,
            closed: false,
        }
    }

    pub fn serial(&self) -> u32 {
        self.version.serial()
    }

    pub fn is_writer(&self) -> bool {
        self.version.is_writer()
    }

    pub(crate) fn version(&self) -> &Arc<Version> {
        &self.version
    }
}

impl Drop for VersionHandle {
    fn drop(&mut self) {
        debug_assert!(self.closed, "version handle dropped without close");
    }
}

//------------ VersionState --------------------------------------------------

/// The database's view of all live versions.
#[derive(Debug)]
pub(crate) struct VersionState {
    /// The latest committed version.
    pub current: Arc<Version>,

    /// The open writable version, if any.
    pub writer: Option<Arc<Version>>,

    /// Committed versions that may still have readers, oldest first.
    pub open: Vec<Arc<Version>>,
}

impl VersionState {
    pub fn new(initial: Arc<Version>) -> Self {
        VersionState {
            current: initial.clone(),
            writer: None,
            open: vec![initial],
        }
    }

    /// The smallest serial any open version can observe.
    pub fn least_serial(&self) -> u32 {
        self.open
            .iter()
            .filter(|version| {
                version.references() > 0
                    || Arc::ptr_eq(version, &self.current)
            })
            .map(|version| version.serial())
            .min()
            .unwrap_or_else(|| self.current.serial())
    }

    /// Drops retired versions from the open list and returns them.
    pub fn take_retired(&mut self) -> Vec<Arc<Version>> {
        let current = self.current.clone();
        let mut retired = Vec::new();
        self.open.retain(|version| {
            if version.references() == 0 && !Arc::ptr_eq(version, &current) {
                retired.push(version.clone());
                false
            } else {
                true
            }
        });
        retired
    }
}

//------------ VersionError --------------------------------------------------

/// A version operation failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VersionError {
    /// A writable version is already open.
    WriterActive,

    /// The handle belongs to a different database.
    WrongDb,

    /// The operation needs a writable version.
    ReadOnly,
}

impl fmt::Display for VersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionError::WriterActive => {
                write!(f, "a writable version is already open")
            }
            VersionError::WrongDb => {
                write!(f, "version handle belongs to a different database")
            }
            VersionError::ReadOnly => {
                write!(f, "operation requires a writable version")
            }
        }
    }
}

impl std::error::Error for VersionError {}
