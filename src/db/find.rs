//! The lookup engine.
//!
//! [`ZoneDb::find`] answers the question the rest of a nameserver asks
//! this database: for a query name and type in some version, what is the
//! best response: data, CNAME/DNAME redirection, a delegation, glue, or
//! a proof of nonexistence. The algorithm walks the tree once, scans the
//! ancestor chain for zone cuts, applies wildcard semantics beneath the
//! closest encloser, and synthesizes NSEC/NSEC3 denial answers for
//! secure zones.

use std::fmt;
use std::sync::Arc;

use crate::base::{Name, Rtype, TypePair};
use crate::tree::{TreeIter, TreeLookup};

use super::node::{Node, Partition, Rdataset};
use super::version::{VersionHandle, VersionMeta};
use super::{TreeSet, ZoneDb, ZoneKind};

//------------ FindOpts ------------------------------------------------------

/// Options steering a lookup.
#[derive(Clone, Copy, Debug, Default)]
pub struct FindOpts {
    /// Continue beneath zone cuts and report glue instead of delegations.
    pub glue_ok: bool,

    /// Disable wildcard matching.
    pub no_wild: bool,

    /// Search the NSEC3 tree instead of the main tree.
    pub force_nsec3: bool,
}

//------------ FindOutcome ---------------------------------------------------

/// What a lookup found. These are answers, not failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FindOutcome {
    /// The requested rdataset was found.
    Success,

    /// A CNAME exists where the requested type does not.
    Cname,

    /// An ancestor redirects the query tree via DNAME.
    Dname,

    /// The name is at or beneath a zone cut; the cut's NS set is bound.
    Delegation,

    /// The requested data exists but is glue beneath a zone cut.
    Glue,

    /// An ANY query landed exactly on a zone cut.
    ZoneCut,

    /// The name does not exist in this version.
    NxDomain,

    /// The name exists but has no rdataset of the requested type.
    NxRrset,

    /// The name is an empty non-terminal in this version.
    EmptyName,

    /// The name would only have matched a wildcard that is not active in
    /// this version.
    EmptyWild,
}

//------------ FindAnswer ----------------------------------------------------

/// The full result of a lookup.
#[derive(Debug)]
pub struct FindAnswer {
    pub outcome: FindOutcome,

    /// The node the answer was taken from, when one was.
    pub node: Option<Arc<Node>>,

    /// The name the answer belongs to: the query name, the zone cut, or
    /// the NSEC owner proving nonexistence.
    pub foundname: Option<Name>,

    /// Whether the answer was synthesized from a wildcard.
    pub wildcard: bool,

    /// The primary rdataset: the answer, the cut NS set, or the NSEC
    /// rdataset of a denial proof.
    pub rdataset: Option<Rdataset>,

    /// The signature covering `rdataset`.
    pub sigrdataset: Option<Rdataset>,
}

impl FindAnswer {
    fn bare(outcome: FindOutcome) -> Self {
        FindAnswer {
            outcome,
            node: None,
            foundname: None,
            wildcard: false,
            rdataset: None,
            sigrdataset: None,
        }
    }
}

//------------ FindError -----------------------------------------------------

/// A lookup failed outright.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FindError {
    /// The query name is not beneath the zone origin.
    OutOfZone,

    /// The zone data is inconsistent; decline to serve it.
    BadDb,
}

impl fmt::Display for FindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindError::OutOfZone => write!(f, "name out of zone"),
            FindError::BadDb => write!(f, "zone database is inconsistent"),
        }
    }
}

impl std::error::Error for FindError {}

//------------ CutInfo -------------------------------------------------------

/// A zone cut remembered during the chain scan.
#[derive(Clone, Debug)]
struct CutInfo {
    node: Arc<Node>,
    /// NS, or DNAME when the cut is a redirection.
    pair: TypePair,
}

impl CutInfo {
    fn is_dname(&self) -> bool {
        self.pair.base() == Rtype::DNAME
    }
}

//--- impl ZoneDb

impl ZoneDb {
    /// Looks up `name` / `rtype` in `version`.
    ///
    /// With no version, the current version is used. The version handle
    /// must belong to this database.
    pub fn find(
        &self,
        name: &Name,
        version: Option<&VersionHandle>,
        rtype: Rtype,
        options: FindOpts,
    ) -> Result<FindAnswer, FindError> {
        let (serial, meta) = match version {
            Some(handle) => {
                self.require_handle(handle);
                (handle.serial(), handle.version().meta.read().clone())
            }
            None => {
                let state = self.state.read();
                let current = &state.versions.current;
                let result = (current.serial(), current.meta.read().clone());
                result
            }
        };

        let trees = self.tree.read();
        let tree = if options.force_nsec3 {
            &trees.nsec3
        } else {
            &trees.main
        };

        let Some(lookup) = tree.lookup(name) else {
            return Err(FindError::OutOfZone);
        };

        // Scan the ancestors (not the query name itself) for the topmost
        // active zone cut. Wildcard candidates are remembered along the
        // way and forgotten again once a cut is found: beneath a cut
        // there is no wildcard matching.
        let mut zonecut = None;
        let mut wild = false;
        let scan_len = lookup.chain.len() - usize::from(lookup.exact);
        for &(cut_name, cut_node) in lookup.chain[..scan_len].iter() {
            if !cut_node.find_callback() {
                continue;
            }
            if let Some(cut) =
                self.check_zonecut(cut_name, cut_node, serial)
            {
                zonecut = Some(cut);
                wild = false;
                break;
            }
            if cut_node.wild() && !options.no_wild {
                wild = true;
            }
        }

        if !lookup.exact || (zonecut.is_some() && !options.glue_ok) {
            return self.partial_match(
                &trees, &lookup, name, rtype, serial, &meta, zonecut, wild,
                options,
            );
        }

        let node = lookup.node.clone();
        self.scan_found_node(
            &trees, &lookup, node, name, rtype, serial, &meta, zonecut,
            false, wild, options,
        )
    }

    /// Looks for an NS or DNAME rdataset active at an ancestor node.
    ///
    /// NS wins over DNAME at the same node unless this is a stub zone,
    /// and NS at the origin never forms a cut in an ordinary zone.
    fn check_zonecut(
        &self,
        name: &Name,
        node: &Arc<Node>,
        serial: u32,
    ) -> Option<CutInfo> {
        let stub = self.kind == ZoneKind::Stub;
        let at_origin = *name == self.origin;
        let partition = self.node_locks[node.locknum()].read();

        let mut ns = false;
        let mut dname = false;
        for head in partition.type_heads(node) {
            let pair = partition.header(head).typepair;
            if pair != TypePair::exact(Rtype::NS)
                && pair != TypePair::exact(Rtype::DNAME)
            {
                continue;
            }
            if partition.first_visible(head, serial).is_none() {
                continue;
            }
            match pair.base() {
                Rtype::NS if !at_origin || stub => ns = true,
                Rtype::DNAME => dname = true,
                _ => {}
            }
        }

        let pair = if ns && !stub {
            TypePair::exact(Rtype::NS)
        } else if dname {
            TypePair::exact(Rtype::DNAME)
        } else if ns {
            TypePair::exact(Rtype::NS)
        } else {
            return None;
        };
        Some(CutInfo {
            node: node.clone(),
            pair,
        })
    }

    /// Builds the DELEGATION / DNAME answer for a remembered cut.
    fn setup_delegation(
        &self,
        cut: &CutInfo,
        serial: u32,
    ) -> Result<FindAnswer, FindError> {
        let partition = self.node_locks[cut.node.locknum()].read();
        let slot = partition
            .visible_header(&cut.node, cut.pair, serial)
            .ok_or(FindError::BadDb)?;
        let rdataset = Some(partition.bind(&cut.node, slot));
        let sigrdataset = if cut.is_dname() {
            partition
                .visible_header(
                    &cut.node,
                    TypePair::sig(Rtype::DNAME),
                    serial,
                )
                .map(|slot| partition.bind(&cut.node, slot))
        } else {
            None
        };
        Ok(FindAnswer {
            outcome: if cut.is_dname() {
                FindOutcome::Dname
            } else {
                FindOutcome::Delegation
            },
            node: Some(cut.node.clone()),
            foundname: Some(cut.node.name().clone()),
            wildcard: false,
            rdataset,
            sigrdataset,
        })
    }

    /// The name does not exist in this version (or only a cut matched).
    #[allow(clippy::too_many_arguments)]
    fn partial_match(
        &self,
        trees: &TreeSet,
        lookup: &TreeLookup<'_, Node>,
        qname: &Name,
        rtype: Rtype,
        serial: u32,
        meta: &VersionMeta,
        zonecut: Option<CutInfo>,
        wild: bool,
        options: FindOpts,
    ) -> Result<FindAnswer, FindError> {
        if let Some(cut) = zonecut {
            return self.setup_delegation(&cut, serial);
        }

        if wild {
            if let Some(wnode) =
                self.find_wildcard(trees, lookup, qname, serial)
            {
                return self.scan_found_node(
                    trees, lookup, wnode, qname, rtype, serial, meta, None,
                    true, false, options,
                );
            }
        }

        // The NSEC3 tree has no empty non-terminals.
        let active = if options.force_nsec3 {
            false
        } else {
            let mut iter = lookup.iter.clone();
            activeempty(self, &mut iter, qname, serial)
        };

        if (meta.secure && meta.nsec3.is_none()) || options.force_nsec3 {
            let (node, name, rdataset, sigrdataset) = self
                .find_closest_nsec(
                    trees,
                    &lookup.iter,
                    serial,
                    meta,
                    options.force_nsec3,
                )?;
            return Ok(FindAnswer {
                outcome: if active {
                    FindOutcome::EmptyName
                } else {
                    FindOutcome::NxDomain
                },
                node: Some(node),
                foundname: Some(name),
                wildcard: false,
                rdataset: Some(rdataset),
                sigrdataset,
            });
        }

        Ok(FindAnswer::bare(if active {
            FindOutcome::EmptyName
        } else {
            FindOutcome::NxDomain
        }))
    }

    /// Scans the headers of the node the query settled on.
    #[allow(clippy::too_many_arguments)]
    fn scan_found_node(
        &self,
        trees: &TreeSet,
        lookup: &TreeLookup<'_, Node>,
        node: Arc<Node>,
        qname: &Name,
        rtype: Rtype,
        serial: u32,
        meta: &VersionMeta,
        mut zonecut: Option<CutInfo>,
        wild: bool,
        search_wild: bool,
        options: FindOpts,
    ) -> Result<FindAnswer, FindError> {
        let havensec3 = meta.nsec3.is_some();
        let mut cname_ok = zonecut.is_none()
            && rtype != Rtype::KEY
            && rtype != Rtype::NSEC;

        // The node itself may be a zone cut. DS lives above the cut, so
        // DS queries ignore the referral; stub zones always refer.
        let at_origin = trees
            .origin_node
            .as_ref()
            .map_or(false, |origin| Arc::ptr_eq(origin, &node));
        let mut maybe_zonecut = zonecut.is_none()
            && node.find_callback()
            && ((!at_origin && !rtype.at_parent())
                || self.kind == ZoneKind::Stub);

        let mut found = None;
        let mut foundsig = None;
        let mut sigtype = TypePair::sig(rtype);
        let mut nsecheader = None;
        let mut nsecsig = None;
        let mut cnamesig = None;
        let mut empty_node = true;
        let mut at_zonecut = false;
        let mut nsec3_mismatch = false;

        {
            let partition = self.node_locks[node.locknum()].read();
            for head in partition.type_heads(&node) {
                let Some(slot) = partition.first_visible(head, serial)
                else {
                    continue;
                };
                let pair = partition.header(slot).typepair;
                empty_node = false;

                if maybe_zonecut && pair == TypePair::exact(Rtype::NS) {
                    zonecut = Some(CutInfo {
                        node: node.clone(),
                        pair,
                    });
                    maybe_zonecut = false;
                    at_zonecut = true;
                    cname_ok = false;
                    // KEY is still allowed at the parent side of the cut;
                    // it is needed for validated dynamic update.
                    if !options.glue_ok
                        && rtype != Rtype::NSEC
                        && rtype != Rtype::KEY
                    {
                        found = None;
                        break;
                    }
                    if found.is_some() && foundsig.is_some() {
                        break;
                    }
                }

                if pair == TypePair::exact(Rtype::NSEC3)
                    && !matchparams(partition.header(slot).slab.iter(), meta)
                {
                    // The chain this NSEC3 belongs to is not the active
                    // one; the node does not exist in this version.
                    nsec3_mismatch = true;
                    break;
                }

                if pair == TypePair::exact(rtype)
                    || rtype == Rtype::ANY
                    || (pair == TypePair::exact(Rtype::CNAME) && cname_ok)
                {
                    found = Some(slot);
                    if pair == TypePair::exact(Rtype::CNAME) && cname_ok {
                        match cnamesig {
                            Some(sig) => foundsig = Some(sig),
                            None => sigtype = TypePair::sig(Rtype::CNAME),
                        }
                    }
                    if !maybe_zonecut && foundsig.is_some() {
                        break;
                    }
                } else if pair == sigtype {
                    foundsig = Some(slot);
                    if !maybe_zonecut && found.is_some() {
                        break;
                    }
                } else if pair == TypePair::exact(Rtype::NSEC) && !havensec3 {
                    // Remember the NSEC in case denial is needed later.
                    nsecheader = Some(slot);
                } else if pair == TypePair::sig(Rtype::NSEC) && !havensec3 {
                    nsecsig = Some(slot);
                } else if cname_ok && pair == TypePair::sig(Rtype::CNAME) {
                    cnamesig = Some(slot);
                }
            }

            if !nsec3_mismatch && !(empty_node && !wild) {
                return self.finish_found_node(
                    &partition, trees, lookup, &node, qname, rtype, serial,
                    meta, zonecut, wild, found, foundsig, nsecheader,
                    nsecsig, at_zonecut,
                );
            }
        }

        // An exact name with nothing active in this version is really a
        // partial match; so is a node whose NSEC3 chain is inactive.
        self.partial_match(
            trees, lookup, qname, rtype, serial, meta, zonecut,
            search_wild, options,
        )
    }

    /// Classifies the scan result and binds the answer rdatasets.
    #[allow(clippy::too_many_arguments)]
    fn finish_found_node(
        &self,
        partition: &Partition,
        trees: &TreeSet,
        lookup: &TreeLookup<'_, Node>,
        node: &Arc<Node>,
        qname: &Name,
        rtype: Rtype,
        serial: u32,
        meta: &VersionMeta,
        zonecut: Option<CutInfo>,
        wild: bool,
        found: Option<u32>,
        foundsig: Option<u32>,
        nsecheader: Option<u32>,
        nsecsig: Option<u32>,
        at_zonecut: bool,
    ) -> Result<FindAnswer, FindError> {
        let havensec3 = meta.nsec3.is_some();

        let Some(found) = found else {
            if let Some(cut) = zonecut {
                // We were looking for glue beneath a cut and found none:
                // the delegation is the answer.
                return self.setup_delegation(&cut, serial);
            }

            if meta.secure
                && !havensec3
                && (nsecheader.is_none() || nsecsig.is_none())
            {
                // A secure zone must prove the missing type. Without an
                // NSEC and its signature here, only a wildcard answer can
                // be denied through the closest provable encloser.
                if !wild {
                    return Err(FindError::BadDb);
                }
                let (nsec_node, name, rdataset, sigrdataset) = self
                    .find_closest_nsec(
                        trees,
                        &lookup.iter,
                        serial,
                        meta,
                        false,
                    )?;
                return Ok(FindAnswer {
                    outcome: FindOutcome::EmptyWild,
                    node: Some(nsec_node),
                    foundname: Some(name),
                    wildcard: false,
                    rdataset: Some(rdataset),
                    sigrdataset,
                });
            }

            let mut answer = FindAnswer {
                outcome: FindOutcome::NxRrset,
                node: Some(node.clone()),
                foundname: Some(qname.clone()),
                wildcard: wild,
                rdataset: None,
                sigrdataset: None,
            };
            if meta.secure && !havensec3 {
                answer.rdataset =
                    nsecheader.map(|slot| partition.bind(node, slot));
                answer.sigrdataset =
                    nsecsig.map(|slot| partition.bind(node, slot));
            }
            return Ok(answer);
        };

        let found_pair = partition.header(found).typepair;
        let outcome = if rtype != found_pair.base()
            && rtype != Rtype::ANY
            && found_pair.base() == Rtype::CNAME
        {
            FindOutcome::Cname
        } else if let Some(cut) = &zonecut {
            if at_zonecut && Arc::ptr_eq(&cut.node, node) {
                match rtype {
                    Rtype::NSEC | Rtype::NSEC3 | Rtype::KEY => {
                        FindOutcome::Success
                    }
                    Rtype::ANY => FindOutcome::ZoneCut,
                    _ => FindOutcome::Glue,
                }
            } else {
                FindOutcome::Glue
            }
        } else {
            FindOutcome::Success
        };

        let mut answer = FindAnswer {
            outcome,
            node: Some(node.clone()),
            foundname: Some(qname.clone()),
            wildcard: wild,
            rdataset: None,
            sigrdataset: None,
        };
        if rtype != Rtype::ANY {
            answer.rdataset = Some(partition.bind(node, found));
            answer.sigrdataset =
                foundsig.map(|slot| partition.bind(node, slot));
        }
        Ok(answer)
    }

    /// Looks for an active wildcard beneath the closest active encloser.
    ///
    /// Walks the ancestor chain deepest-first. A level flagged `wild`
    /// whose `*` child is active (or an active empty non-terminal) wins,
    /// unless a closer active name blocks the match; the first active
    /// level without a match ends the search.
    fn find_wildcard(
        &self,
        trees: &TreeSet,
        lookup: &TreeLookup<'_, Node>,
        qname: &Name,
        serial: u32,
    ) -> Option<Arc<Node>> {
        for &(level_name, level_node) in lookup.chain.iter().rev() {
            let (active, level_wild) = {
                let partition =
                    self.node_locks[level_node.locknum()].read();
                (
                    partition.node_active(level_node, serial, true),
                    level_node.wild(),
                )
            };

            if level_wild {
                let Ok(wname) = level_name.to_wildcard() else {
                    return None;
                };
                if let Some(wlookup) = trees.main.lookup(&wname) {
                    if wlookup.exact {
                        let wnode = wlookup.node.clone();
                        let wactive = self.node_locks[wnode.locknum()]
                            .read()
                            .node_active(&wnode, serial, true);
                        let usable = wactive || {
                            let mut witer = wlookup.iter.clone();
                            activeempty(self, &mut witer, &wname, serial)
                        };
                        if usable {
                            if self.wildcard_blocked(
                                lookup, qname, &wname, serial,
                            ) {
                                return None;
                            }
                            return Some(wnode);
                        }
                    }
                }
            }

            if active {
                // An existing name below any remaining wildcard level
                // is the closest encloser; wildcards above it cannot
                // apply.
                return None;
            }
        }
        None
    }

    /// Checks for an active name between the wildcard level and `qname`
    /// that invalidates a wildcard match.
    fn wildcard_blocked(
        &self,
        lookup: &TreeLookup<'_, Node>,
        qname: &Name,
        wname: &Name,
        serial: u32,
    ) -> bool {
        let mut back = lookup.iter.clone();
        let prev = step_active(self, &mut back, serial, false);

        let mut fwd = lookup.iter.clone();
        let next = if fwd.next().is_some() {
            step_active(self, &mut fwd, serial, true)
        } else {
            None
        };

        if prev.is_none() && next.is_none() {
            return false;
        }

        // Strip the wildcard label to get the terminal the walk ends at.
        let terminal = wname.strip_left(1).expect("wildcard has a label");
        let mut rname = qname.clone();
        loop {
            if prev
                .as_ref()
                .map_or(false, |name| name.is_subdomain(&rname))
                || next
                    .as_ref()
                    .map_or(false, |name| name.is_subdomain(&rname))
            {
                return true;
            }
            rname = match rname.strip_left(1) {
                Some(rest) => rest,
                None => return false,
            };
            if rname == terminal {
                return false;
            }
        }
    }

    /// Finds the NSEC/NSEC3 at or before the search point.
    ///
    /// Walks backwards using the auxiliary NSEC tree (or the NSEC3 tree
    /// itself, with wrap-around), demanding a version-visible NSEC with a
    /// signature when the zone is secure. Running out of names means the
    /// database is corrupt.
    #[allow(clippy::type_complexity)]
    fn find_closest_nsec(
        &self,
        trees: &TreeSet,
        start: &TreeIter<'_, Node>,
        serial: u32,
        meta: &VersionMeta,
        nsec3: bool,
    ) -> Result<(Arc<Node>, Name, Rdataset, Option<Rdataset>), FindError>
    {
        let pair = if nsec3 {
            TypePair::exact(Rtype::NSEC3)
        } else {
            TypePair::exact(Rtype::NSEC)
        };
        let sigpair = TypePair::sig(pair.base());
        let need_sig = meta.secure;

        let mut iter = start.clone();
        let mut wraps = nsec3;
        let mut current = iter.current().map(|(n, v)| (n.clone(), v.clone()));

        // Auxiliary-tree state for the NSEC walk; entered lazily in the
        // hope that the starting node answers directly.
        let mut nseciter: Option<TreeIter<'_, Node>> = None;

        loop {
            let Some((name, node)) = current.take() else {
                // Walked off the front. NSEC3 searches wrap once.
                if wraps {
                    wraps = false;
                    iter = trees.nsec3.iter_at_last();
                    current =
                        iter.current().map(|(n, v)| (n.clone(), v.clone()));
                    continue;
                }
                tracing::error!(
                    zone = %self.origin,
                    "closest NSEC search exhausted; zone data is corrupt"
                );
                return Err(FindError::BadDb);
            };

            let partition = self.node_locks[node.locknum()].read();
            let mut found = None;
            let mut foundsig = None;
            let mut empty_node = true;
            for head in partition.type_heads(&node) {
                let Some(slot) = partition.first_visible(head, serial)
                else {
                    continue;
                };
                empty_node = false;
                let header_pair = partition.header(slot).typepair;
                if header_pair == pair {
                    found = Some(slot);
                } else if header_pair == sigpair {
                    foundsig = Some(slot);
                }
                if found.is_some() && foundsig.is_some() {
                    break;
                }
            }

            if !empty_node {
                if let Some(found) = found {
                    let chain_mismatch = nsec3
                        && meta.nsec3.is_some()
                        && !matchparams(
                            partition.header(found).slab.iter(),
                            meta,
                        );
                    if !chain_mismatch
                        && (foundsig.is_some() || !need_sig)
                    {
                        let rdataset = partition.bind(&node, found);
                        let sigrdataset =
                            foundsig.map(|slot| partition.bind(&node, slot));
                        return Ok((
                            node.clone(),
                            name,
                            rdataset,
                            sigrdataset,
                        ));
                    }
                    if !chain_mismatch {
                        // Found the NSEC but not its mandatory signature.
                        return Err(FindError::BadDb);
                    }
                } else if foundsig.is_some() {
                    // A signature without its NSEC is corruption too.
                    return Err(FindError::BadDb);
                }
                // Otherwise this is active but obscured data (glue);
                // treat the node as empty and keep walking.
            }
            drop(partition);

            current = if nsec3 {
                iter.prev().map(|(n, v)| (n.clone(), v.clone()))
            } else {
                self.previous_nsec_name(
                    trees,
                    &name,
                    &mut nseciter,
                )?
            };
        }
    }

    /// Steps to the previous candidate through the auxiliary NSEC tree
    /// and maps it back into the main tree.
    fn previous_nsec_name<'t>(
        &self,
        trees: &'t TreeSet,
        name: &Name,
        nseciter: &mut Option<TreeIter<'t, Node>>,
    ) -> Result<Option<(Name, Arc<Node>)>, FindError> {
        loop {
            let candidate = match nseciter {
                None => {
                    // First auxiliary step: position at the current name.
                    let Some(nlookup) = trees.nsec.lookup(name) else {
                        return Err(FindError::BadDb);
                    };
                    let mut iter = nlookup.iter;
                    let candidate = if nlookup.exact {
                        // The starting node had an unacceptable NSEC; go
                        // one back.
                        iter.prev().map(|(n, _)| n.clone())
                    } else {
                        iter.current().map(|(n, _)| n.clone())
                    };
                    *nseciter = Some(iter);
                    candidate
                }
                Some(iter) => iter.prev().map(|(n, _)| n.clone()),
            };
            let Some(candidate) = candidate else {
                return Ok(None);
            };

            // Nodes awaiting deletion may linger in the auxiliary tree
            // without a twin; skip them.
            if let Some(mlookup) = trees.main.lookup(&candidate) {
                if mlookup.exact {
                    return Ok(Some((candidate, mlookup.node.clone())));
                }
            }
        }
    }
}

//------------ Free helpers --------------------------------------------------

/// Walks the iterator until a node with data visible at `serial`,
/// checking the current position first. Returns that node's name.
fn step_active(
    db: &ZoneDb,
    iter: &mut TreeIter<'_, Node>,
    serial: u32,
    forward: bool,
) -> Option<Name> {
    loop {
        let (name, node) = iter.current()?;
        let active = db.node_locks[node.locknum()]
            .read()
            .node_active(node, serial, false);
        if active {
            return Some(name.clone());
        }
        let stepped = if forward { iter.next() } else { iter.prev() };
        stepped?;
    }
}

/// Returns whether `current` is an empty non-terminal: the next active
/// name after it is one of its subdomains.
fn activeempty(
    db: &ZoneDb,
    iter: &mut TreeIter<'_, Node>,
    current: &Name,
    serial: u32,
) -> bool {
    if iter.next().is_none() {
        return false;
    }
    match step_active(db, iter, serial, true) {
        Some(next) => next.is_subdomain(current),
        None => false,
    }
}

/// Returns whether any NSEC3 record in the slab matches the version's
/// NSEC3 parameters.
fn matchparams<'a>(
    records: impl Iterator<Item = &'a [u8]>,
    meta: &VersionMeta,
) -> bool {
    let Some(params) = meta.nsec3.as_ref() else {
        return false;
    };
    for rdata in records {
        // hash(1) flags(1) iterations(2) salt_len(1) salt(..)
        if rdata.len() < 5 {
            continue;
        }
        let hash = rdata[0];
        let iterations = u16::from_be_bytes([rdata[2], rdata[3]]);
        let salt_len = usize::from(rdata[4]);
        if rdata.len() < 5 + salt_len {
            continue;
        }
        let salt = &rdata[5..5 + salt_len];
        if hash == params.hash
            && iterations == params.iterations
            && salt == params.salt.as_slice()
        {
            return true;
        }
    }
    false
}
