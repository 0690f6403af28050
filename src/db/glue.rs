//! The additional-data cache for delegations.
//!
//! Answering a delegation wants the addresses of the NS targets in the
//! additional section. Computing them means running full lookups, so the
//! result is memoized on the NS slab header itself: the first consumer
//! computes the list and publishes it with a first-writer-wins store; an
//! empty list records "looked up, nothing there". The cache dies with the
//! header or with the version it was computed in, whichever goes first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::base::{Name, Rtype};

use super::find::{FindOpts, FindOutcome};
use super::node::Rdataset;
use super::version::{HeaderKey, VersionHandle};
use super::ZoneDb;

//------------ Glue ----------------------------------------------------------

/// The additional-section data for one NS target.
#[derive(Clone, Debug)]
pub struct Glue {
    pub name: Name,
    pub a: Option<Rdataset>,
    pub sig_a: Option<Rdataset>,
    pub aaaa: Option<Rdataset>,
    pub sig_aaaa: Option<Rdataset>,

    /// In-bailiwick glue: without it the delegation does not resolve, so
    /// assembly keeps it in the message even under truncation pressure.
    pub required: bool,
}

/// The memoized glue of one NS rdataset. Empty means "none exists".
#[derive(Debug, Default)]
pub struct GlueList {
    pub entries: Vec<Glue>,
}

//------------ AdditionalSection ---------------------------------------------

/// An assembling ADDITIONAL section.
#[derive(Debug, Default)]
pub struct AdditionalSection {
    names: Vec<AdditionalName>,
}

/// One owner name in the ADDITIONAL section with its rdatasets.
#[derive(Clone, Debug)]
pub struct AdditionalName {
    pub name: Name,
    pub rdatasets: Vec<Rdataset>,
}

impl AdditionalSection {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn names(&self) -> &[AdditionalName] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Adds one glue entry. Required glue moves to the front so that a
    /// renderer that honors only the leading name keeps it.
    fn push_glue(&mut self, glue: &Glue) {
        let rdatasets: Vec<Rdataset> = [
            glue.a.clone(),
            glue.sig_a.clone(),
            glue.aaaa.clone(),
            glue.sig_aaaa.clone(),
        ]
        .into_iter()
        .flatten()
        .collect();
        if rdatasets.is_empty() {
            return;
        }
        let name = AdditionalName {
            name: glue.name.clone(),
            rdatasets,
        };
        if glue.required {
            self.names.insert(0, name);
        } else {
            self.names.push(name);
        }
    }
}

//------------ GlueCacheStats ------------------------------------------------

/// Counters for glue-cache effectiveness.
#[derive(Debug, Default)]
pub struct GlueCacheStats {
    hits_present: AtomicU64,
    hits_absent: AtomicU64,
    inserts_present: AtomicU64,
    inserts_absent: AtomicU64,
}

impl GlueCacheStats {
    pub fn hits_present(&self) -> u64 {
        self.hits_present.load(Ordering::Relaxed)
    }

    pub fn hits_absent(&self) -> u64 {
        self.hits_absent.load(Ordering::Relaxed)
    }

    pub fn inserts_present(&self) -> u64 {
        self.inserts_present.load(Ordering::Relaxed)
    }

    pub fn inserts_absent(&self) -> u64 {
        self.inserts_absent.load(Ordering::Relaxed)
    }
}

//--- impl ZoneDb

impl ZoneDb {
    /// Installs the statistics sink for the glue cache.
    pub fn set_glue_cache_stats(&self, stats: Arc<GlueCacheStats>) {
        let _ = self.glue_stats.set(stats);
    }

    /// Adds the additional-section addresses for an NS rdataset.
    ///
    /// The glue list is computed on first use by looking up every NS
    /// target with glue allowed, then cached on the header. The cache
    /// entry is pushed onto the version's glue stack so it is reclaimed
    /// when the version goes away.
    pub fn add_glue(
        &self,
        version: &VersionHandle,
        ns: &Rdataset,
        additional: &mut AdditionalSection,
    ) {
        self.require_handle(version);
        assert_eq!(ns.rtype(), Rtype::NS, "glue belongs to NS rdatasets");

        let locknum = ns.header_ref().locknum;

        // Fast path: someone already published a list.
        let cached = {
            let partition = self.node_locks[locknum].read();
            if !partition.still_bound(ns) {
                return;
            }
            partition
                .header(ns.header_ref().slot)
                .glue
                .get()
                .cloned()
        };

        let glue = match cached {
            Some(glue) => {
                self.count_glue(glue.entries.is_empty(), false);
                glue
            }
            None => {
                // Compute without holding any node lock; the finds below
                // take tree and node locks themselves.
                let computed = Arc::new(self.compute_glue(version, ns));
                let partition = self.node_locks[locknum].read();
                if !partition.still_bound(ns) {
                    return;
                }
                let cell = &partition.header(ns.header_ref().slot).glue;
                match cell.set(computed.clone()) {
                    Ok(()) => {
                        self.count_glue(computed.entries.is_empty(), true);
                        version.version().glue_stack.lock().push(HeaderKey {
                            node: ns.node().clone(),
                            typepair: ns.typepair(),
                        });
                        computed
                    }
                    Err(_) => {
                        // Somebody else was faster; use their list.
                        let glue = cell.get().cloned().unwrap_or(computed);
                        self.count_glue(glue.entries.is_empty(), false);
                        glue
                    }
                }
            }
        };

        for entry in glue.entries.iter() {
            additional.push_glue(entry);
        }
    }

    fn compute_glue(&self, version: &VersionHandle, ns: &Rdataset) -> GlueList {
        let mut list = GlueList::default();
        for rdata in ns.iter() {
            let Ok(target) = Name::from_wire(rdata) else {
                continue;
            };
            let opts = FindOpts {
                glue_ok: true,
                ..Default::default()
            };
            let mut glue = Glue {
                name: target.clone(),
                a: None,
                sig_a: None,
                aaaa: None,
                sig_aaaa: None,
                required: target.is_subdomain(ns.owner()),
            };
            for rtype in [Rtype::A, Rtype::AAAA] {
                let Ok(answer) = self.find(&target, Some(version), rtype, opts)
                else {
                    continue;
                };
                if answer.outcome == FindOutcome::Glue {
                    match rtype {
                        Rtype::A => {
                            glue.a = answer.rdataset;
                            glue.sig_a = answer.sigrdataset;
                        }
                        _ => {
                            glue.aaaa = answer.rdataset;
                            glue.sig_aaaa = answer.sigrdataset;
                        }
                    }
                }
            }
            if glue.a.is_some() || glue.aaaa.is_some() {
                list.entries.push(glue);
            }
        }
        list
    }

    fn count_glue(&self, absent: bool, insert: bool) {
        let Some(stats) = self.glue_stats.get() else {
            return;
        };
        let counter = match (insert, absent) {
            (false, false) => &stats.hits_present,
            (false, true) => &stats.hits_absent,
            (true, false) => &stats.inserts_present,
            (true, true) => &stats.inserts_absent,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
