//! Nodes, slab headers, and the node-lock partitions that own them.
//!
//! A node exists once per owner name in a tree and carries the head of a
//! singly linked list of typed slab headers. Headers for the same type
//! form a second, downward list ordered by strictly decreasing installer
//! serial: the multi-version history of that rdataset. All headers of the
//! nodes in one partition live in that partition's slot arena and are
//! addressed by index, so chains never hold owning pointers to each other.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use slab::Slab;

use crate::base::{Name, Rtype, Trust, TypePair};
use crate::slab::{RdataSlab, SlabIter};

use super::glue::GlueList;
use super::resign::{ResignHeap, Sooner};

/// The "no slot" marker used in header links.
pub(crate) const NONE: u32 = u32::MAX;

//------------ Header attribute bits -----------------------------------------

pub(crate) mod attrs {
    /// The rdataset does not exist in this and older versions.
    pub const NONEXISTENT: u16 = 0x0001;
    /// The header was rolled back and must be treated as absent.
    pub const IGNORE: u16 = 0x0002;
    /// The header is stale and excluded from wildcard activity checks.
    pub const ANCIENT: u16 = 0x0004;
    /// The rdataset participates in re-sign scheduling.
    pub const RESIGN: u16 = 0x0008;
    /// The rdataset has been accounted in rdataset statistics.
    pub const STATCOUNT: u16 = 0x0010;
}

//------------ NodeNsec ------------------------------------------------------

/// Which denial-of-existence role a node plays.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum NodeNsec {
    Normal = 0,
    HasNsec = 1,
    Nsec3 = 2,
}

impl NodeNsec {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => NodeNsec::HasNsec,
            2 => NodeNsec::Nsec3,
            _ => NodeNsec::Normal,
        }
    }
}

//------------ Node ----------------------------------------------------------

/// One owner name in a tree.
#[derive(Debug)]
pub struct Node {
    name: Name,
    locknum: usize,
    head: AtomicU32,
    wild: AtomicBool,
    find_callback: AtomicBool,
    nsec: AtomicU8,
    references: AtomicU32,
}

impl Node {
    pub(crate) fn new(name: Name, locknum: usize) -> Arc<Self> {
        Arc::new(Node {
            name,
            locknum,
            head: AtomicU32::new(NONE),
            wild: AtomicBool::new(false),
            find_callback: AtomicBool::new(false),
            nsec: AtomicU8::new(NodeNsec::Normal as u8),
            references: AtomicU32::new(0),
        })
    }

    /// Returns the owner name of this node.
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Returns the node-lock partition this node belongs to.
    pub fn locknum(&self) -> usize {
        self.locknum
    }

    pub(crate) fn head(&self) -> u32 {
        self.head.load(Ordering::Acquire)
    }

    pub(crate) fn set_head(&self, slot: u32) {
        self.head.store(slot, Ordering::Release)
    }

    /// Returns whether this node is the parent of a wildcard child.
    pub fn wild(&self) -> bool {
        self.wild.load(Ordering::Acquire)
    }

    pub(crate) fn set_wild(&self, wild: bool) {
        self.wild.store(wild, Ordering::Release)
    }

    /// Returns whether lookups must inspect this node for zone cuts.
    pub fn find_callback(&self) -> bool {
        self.find_callback.load(Ordering::Acquire)
    }

    pub(crate) fn set_find_callback(&self, value: bool) {
        self.find_callback.store(value, Ordering::Release)
    }

    pub fn nsec(&self) -> NodeNsec {
        NodeNsec::from_u8(self.nsec.load(Ordering::Acquire))
    }

    pub(crate) fn set_nsec(&self, nsec: NodeNsec) {
        self.nsec.store(nsec as u8, Ordering::Release)
    }

    /// Takes an additional reference to the node.
    ///
    /// A referenced node is never reclaimed, even if it is semantically
    /// empty in every version.
    pub fn new_reference(&self) {
        self.references.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops a reference taken with [`new_reference`].
    ///
    /// [`new_reference`]: Node::new_reference
    pub fn release(&self) -> u32 {
        let prev = self.references.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0);
        prev - 1
    }

    pub fn references(&self) -> u32 {
        self.references.load(Ordering::Acquire)
    }
}

//------------ SlabHeader ----------------------------------------------------

/// The record-of-record about one slab at one node.
#[derive(Debug)]
pub struct SlabHeader {
    pub typepair: TypePair,
    pub ttl: u32,
    pub trust: Trust,
    pub attributes: u16,

    /// The writer serial that installed this header.
    pub serial: u32,

    /// The packed records; empty for a NONEXISTENT header.
    pub slab: RdataSlab,

    /// The node this header belongs to.
    pub node: Arc<Node>,

    /// The next header of a different type at the same node.
    pub next: u32,

    /// The header this one shadows: same type, older serial.
    pub down: u32,

    /// 1-based position in the partition's resign heap; 0 when absent.
    pub heap_index: usize,

    /// Re-sign deadline in seconds, with the bit shifted out of the
    /// original 33-bit time kept separately.
    pub resign: u32,
    pub resign_lsb: bool,

    /// The lazily published additional-data cache. First writer wins;
    /// an empty list records that glue was looked up and absent.
    pub glue: OnceLock<Arc<GlueList>>,
}

impl SlabHeader {
    pub fn new(
        typepair: TypePair,
        ttl: u32,
        trust: Trust,
        serial: u32,
        slab: RdataSlab,
        node: Arc<Node>,
    ) -> Self {
        SlabHeader {
            typepair,
            ttl,
            trust,
            attributes: 0,
            serial,
            slab,
            node,
            next: NONE,
            down: NONE,
            heap_index: 0,
            resign: 0,
            resign_lsb: false,
            glue: OnceLock::new(),
        }
    }

    /// Creates the header that records "this rdataset does not exist".
    pub fn nonexistent(typepair: TypePair, serial: u32, node: Arc<Node>) -> Self {
        let mut header = Self::new(
            typepair,
            0,
            Trust::None,
            serial,
            RdataSlab::empty(),
            node,
        );
        header.attributes |= attrs::NONEXISTENT;
        header
    }

    pub fn exists(&self) -> bool {
        self.attributes & attrs::NONEXISTENT == 0
    }

    pub fn ignored(&self) -> bool {
        self.attributes & attrs::IGNORE != 0
    }

    pub fn ancient(&self) -> bool {
        self.attributes & attrs::ANCIENT != 0
    }

    pub fn resigns(&self) -> bool {
        self.attributes & attrs::RESIGN != 0
    }

    /// Whether a reader at `serial` settles on this header while walking
    /// a down chain.
    fn settles(&self, serial: u32) -> bool {
        self.serial <= serial && !self.ignored()
    }
}

//------------ HeaderRef -----------------------------------------------------

/// Addresses one header: its partition and its slot within it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderRef {
    pub locknum: usize,
    pub slot: u32,
}

//------------ Partition -----------------------------------------------------

/// The data guarded by one node lock.
#[derive(Debug, Default)]
pub struct Partition {
    pub headers: Slab<SlabHeader>,
    pub heap: ResignHeap,
}

impl Partition {
    pub fn header(&self, slot: u32) -> &SlabHeader {
        &self.headers[slot as usize]
    }

    pub fn header_mut(&mut self, slot: u32) -> &mut SlabHeader {
        &mut self.headers[slot as usize]
    }

    /// Walks the down chain from `slot`, returning the header a reader at
    /// `serial` sees, or `None` for "absent in this version".
    pub fn first_visible(&self, mut slot: u32, serial: u32) -> Option<u32> {
        loop {
            let header = self.header(slot);
            if header.settles(serial) {
                return header.exists().then_some(slot);
            }
            if header.down == NONE {
                return None;
            }
            slot = header.down;
        }
    }

    /// Returns the slots of the type-chain heads at `node`.
    pub fn type_heads(&self, node: &Node) -> TypeHeads<'_> {
        TypeHeads {
            partition: self,
            slot: node.head(),
        }
    }

    /// Returns the chain head for `typepair` at `node`, if present.
    pub fn find_type_head(&self, node: &Node, typepair: TypePair) -> Option<u32> {
        self.type_heads(node)
            .find(|&slot| self.header(slot).typepair == typepair)
    }

    /// Returns the version-visible header for `typepair` at `node`.
    pub fn visible_header(
        &self,
        node: &Node,
        typepair: TypePair,
        serial: u32,
    ) -> Option<u32> {
        let head = self.find_type_head(node, typepair)?;
        self.first_visible(head, serial)
    }

    /// Returns whether any rdataset at `node` exists in version `serial`.
    pub fn node_active(&self, node: &Node, serial: u32, skip_ancient: bool) -> bool {
        self.type_heads(node).any(|head| {
            match self.first_visible(head, serial) {
                Some(slot) => !(skip_ancient && self.header(slot).ancient()),
                None => false,
            }
        })
    }

    /// Links `header` in as the new chain head for its type at `node`.
    ///
    /// An old head installed by an earlier version is shadowed (the new
    /// header's `down` points at it) and its slot is returned; an old
    /// head carrying the same serial is replaced outright, keeping the
    /// down chain in strictly decreasing serial order.
    pub fn install(
        &mut self,
        node: &Node,
        mut header: SlabHeader,
        sooner: Sooner,
    ) -> (u32, Option<u32>) {
        let typepair = header.typepair;
        let mut prev = None;
        let mut cur = node.head();
        while cur != NONE {
            if self.header(cur).typepair == typepair {
                break;
            }
            prev = Some(cur);
            cur = self.header(cur).next;
        }

        let old = (cur != NONE).then_some(cur);
        let replace =
            old.map_or(false, |old| self.header(old).serial == header.serial);
        match old {
            Some(old) if replace => {
                header.next = self.header(old).next;
                header.down = self.header(old).down;
            }
            Some(old) => {
                header.next = self.header(old).next;
                header.down = old;
            }
            None => {
                header.next = node.head();
                header.down = NONE;
            }
        }
        let slot = self.headers.insert(header) as u32;
        match (old, prev) {
            // A fresh type becomes the new list head.
            (None, _) => node.set_head(slot),
            (Some(_), None) => node.set_head(slot),
            (Some(_), Some(prev)) => self.header_mut(prev).next = slot,
        }
        if replace {
            self.free(old.expect("replace implies an old head"), sooner);
            (slot, None)
        } else {
            (slot, old)
        }
    }

    /// Unlinks a chain-head header, promoting its `down` successor.
    ///
    /// Used by rollback: a writer's headers are always chain heads.
    pub fn unlink_head(&mut self, node: &Node, slot: u32) -> SlabHeader {
        let mut prev = None;
        let mut cur = node.head();
        while cur != slot {
            debug_assert!(cur != NONE);
            prev = Some(cur);
            cur = self.header(cur).next;
        }

        let next = self.header(slot).next;
        let down = self.header(slot).down;
        let successor = if down != NONE {
            self.header_mut(down).next = next;
            down
        } else {
            next
        };
        match prev {
            Some(prev) => self.header_mut(prev).next = successor,
            None => node.set_head(successor),
        }
        self.headers.remove(slot as usize)
    }

    /// Frees a header slot, dropping it from the resign heap first.
    pub fn free(&mut self, slot: u32, sooner: Sooner) {
        let heap_index = self.header(slot).heap_index;
        if heap_index != 0 {
            let Partition { headers, heap } = self;
            heap.delete(headers, heap_index, sooner);
        }
        self.headers.remove(slot as usize);
    }

    /// Reclaims chain entries at `node` that no live version can see.
    ///
    /// `least_serial` is the smallest serial any open version holds. For
    /// each type, everything below the header that version sees is freed;
    /// a NONEXISTENT header that has become the entire chain is dropped
    /// with its whole type.
    pub fn prune_node(&mut self, node: &Node, least_serial: u32, sooner: Sooner) {
        let heads: Vec<u32> = self.type_heads(node).collect();
        for head in heads {
            let mut cur = head;
            let visible = loop {
                let header = self.header(cur);
                if header.settles(least_serial) {
                    break Some(cur);
                }
                if header.down == NONE {
                    break None;
                }
                cur = header.down;
            };
            let Some(visible) = visible else { continue };

            let mut below = self.header(visible).down;
            self.header_mut(visible).down = NONE;
            while below != NONE {
                let next = self.header(below).down;
                self.free(below, sooner);
                below = next;
            }

            if visible == head && !self.header(visible).exists() {
                self.unlink_head(node, visible);
            }
        }
    }

    /// Builds the caller-facing view of the header in `slot`.
    pub fn bind(&self, node: &Arc<Node>, slot: u32) -> Rdataset {
        let header = self.header(slot);
        Rdataset {
            owner: node.name().clone(),
            node: node.clone(),
            header_ref: HeaderRef {
                locknum: node.locknum(),
                slot,
            },
            typepair: header.typepair,
            ttl: header.ttl,
            trust: header.trust,
            serial: header.serial,
            slab: header.slab.clone(),
            resign: header
                .resigns()
                .then_some((header.resign, header.resign_lsb)),
        }
    }

    /// Returns whether `slot` still holds the header `rdataset` was bound
    /// from. Slots are reused, so header-addressed operations revalidate.
    pub fn still_bound(&self, rdataset: &Rdataset) -> bool {
        self.headers
            .get(rdataset.header_ref.slot as usize)
            .map_or(false, |header| {
                Arc::ptr_eq(&header.node, &rdataset.node)
                    && header.typepair == rdataset.typepair
                    && header.serial == rdataset.serial
            })
    }

    /// Snapshots every rdataset at `node` visible in version `serial`.
    pub fn all_rdatasets(
        &self,
        node: &Arc<Node>,
        serial: u32,
    ) -> Vec<Rdataset> {
        self.type_heads(node)
            .filter_map(|head| self.first_visible(head, serial))
            .map(|slot| self.bind(node, slot))
            .collect()
    }
}

//------------ TypeHeads -----------------------------------------------------

/// An iterator over a node's type-chain heads.
pub struct TypeHeads<'a> {
    partition: &'a Partition,
    slot: u32,
}

impl<'a> Iterator for TypeHeads<'a> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.slot == NONE {
            return None;
        }
        let slot = self.slot;
        self.slot = self.partition.header(slot).next;
        Some(slot)
    }
}

//------------ Rdataset ------------------------------------------------------

/// A bound rdataset: the answer-facing view of one slab header.
#[derive(Clone, Debug)]
pub struct Rdataset {
    owner: Name,
    node: Arc<Node>,
    header_ref: HeaderRef,
    typepair: TypePair,
    ttl: u32,
    trust: Trust,
    serial: u32,
    slab: RdataSlab,
    resign: Option<(u32, bool)>,
}

impl Rdataset {
    /// Returns the owner name of the rdataset.
    pub fn owner(&self) -> &Name {
        &self.owner
    }

    /// Returns the record type; RRSIG for signature rdatasets.
    pub fn rtype(&self) -> Rtype {
        self.typepair.base()
    }

    /// Returns the covered type of a signature rdataset.
    pub fn covers(&self) -> Rtype {
        self.typepair.covers()
    }

    pub fn typepair(&self) -> TypePair {
        self.typepair
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn trust(&self) -> Trust {
        self.trust
    }

    /// Returns the re-sign deadline if the set is scheduled for re-signing.
    pub fn resign(&self) -> Option<(u32, bool)> {
        self.resign
    }

    pub fn count(&self) -> usize {
        self.slab.count()
    }

    /// Returns an iterator over the raw rdata in canonical order.
    pub fn iter(&self) -> SlabIter<'_> {
        self.slab.iter()
    }

    pub fn slab(&self) -> &RdataSlab {
        &self.slab
    }

    pub(crate) fn header_ref(&self) -> HeaderRef {
        self.header_ref
    }

    pub(crate) fn node(&self) -> &Arc<Node> {
        &self.node
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::super::resign::resign_sooner;
    use super::*;

    fn node() -> Arc<Node> {
        Node::new("example.".parse().unwrap(), 0)
    }

    fn header(node: &Arc<Node>, rtype: Rtype, serial: u32) -> SlabHeader {
        SlabHeader::new(
            TypePair::exact(rtype),
            300,
            Trust::Ultimate,
            serial,
            RdataSlab::from_records([b"\x01"]).unwrap(),
            node.clone(),
        )
    }

    #[test]
    fn install_links_types_and_versions() {
        let node = node();
        let mut part = Partition::default();

        let (a1, old) = part.install(&node, header(&node, Rtype::A, 1), resign_sooner);
        assert!(old.is_none());
        let (ns1, _) = part.install(&node, header(&node, Rtype::NS, 1), resign_sooner);
        let (a2, old) = part.install(&node, header(&node, Rtype::A, 2), resign_sooner);
        assert_eq!(old, Some(a1));

        // Distinct types via `next`, versions via `down`.
        assert_eq!(part.header(a2).down, a1);
        let heads: Vec<u32> = part.type_heads(&node).collect();
        assert_eq!(heads, [a2, ns1]);

        // Readers settle on the right serial.
        assert_eq!(
            part.visible_header(&node, TypePair::exact(Rtype::A), 1),
            Some(a1)
        );
        assert_eq!(
            part.visible_header(&node, TypePair::exact(Rtype::A), 7),
            Some(a2)
        );
    }

    #[test]
    fn nonexistent_terminates_visibility() {
        let node = node();
        let mut part = Partition::default();
        part.install(&node, header(&node, Rtype::A, 1), resign_sooner);
        part.install(
            &node,
            SlabHeader::nonexistent(TypePair::exact(Rtype::A), 2, node.clone()),
            resign_sooner,
        );
        assert!(part
            .visible_header(&node, TypePair::exact(Rtype::A), 1)
            .is_some());
        assert!(part
            .visible_header(&node, TypePair::exact(Rtype::A), 2)
            .is_none());
        assert!(part.node_active(&node, 1, false));
        assert!(!part.node_active(&node, 2, false));
    }

    #[test]
    fn unlink_head_promotes_down() {
        let node = node();
        let mut part = Partition::default();
        let (a1, _) = part.install(&node, header(&node, Rtype::A, 1), resign_sooner);
        let (ns1, _) = part.install(&node, header(&node, Rtype::NS, 1), resign_sooner);
        let (a2, _) = part.install(&node, header(&node, Rtype::A, 2), resign_sooner);

        part.unlink_head(&node, a2);
        let heads: Vec<u32> = part.type_heads(&node).collect();
        assert_eq!(heads, [a1, ns1]);
        assert_eq!(
            part.visible_header(&node, TypePair::exact(Rtype::A), 9),
            Some(a1)
        );
    }

    #[test]
    fn prune_frees_shadowed_history() {
        let node = node();
        let mut part = Partition::default();
        part.install(&node, header(&node, Rtype::A, 1), resign_sooner);
        part.install(&node, header(&node, Rtype::A, 2), resign_sooner);
        let (a3, _) = part.install(&node, header(&node, Rtype::A, 3), resign_sooner);

        part.prune_node(&node, 2, super::super::resign::resign_sooner);
        // Serial 2 still visible, serial 1 gone.
        assert_eq!(part.headers.len(), 2);
        assert_eq!(
            part.visible_header(&node, TypePair::exact(Rtype::A), 5),
            Some(a3)
        );

        part.prune_node(&node, 3, super::super::resign::resign_sooner);
        assert_eq!(part.headers.len(), 1);
    }

    #[test]
    fn prune_drops_whole_nonexistent_chains() {
        let node = node();
        let mut part = Partition::default();
        part.install(&node, header(&node, Rtype::A, 1), resign_sooner);
        part.install(
            &node,
            SlabHeader::nonexistent(TypePair::exact(Rtype::A), 2, node.clone()),
            resign_sooner,
        );
        part.prune_node(&node, 2, super::super::resign::resign_sooner);
        assert_eq!(part.headers.len(), 0);
        assert_eq!(node.head(), NONE);
    }
}
