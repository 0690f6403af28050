//! A versioned, in-memory authoritative DNS zone database.
//!
//! This crate is the storage heart of an authoritative name server: an
//! ordered tree of owner names whose nodes carry multi-version rdataset
//! histories, so that queries, zone loads, dynamic updates, and DNSSEC
//! maintenance can all proceed concurrently. Readers attach to a
//! committed version and observe it unchanged; one writer at a time
//! stacks changes and publishes them atomically.
//!
//! The pieces, bottom up:
//!
//! * [`base`]: wire-format [`Name`]s, record types, classes, trust.
//! * [`slab`]: the packed encoding of one rdataset's records.
//! * [`tree`]: the canonical-order name tree with chain lookup.
//! * [`db`]: the database itself: nodes and header chains, the version
//!   manager, the lookup engine with delegation/wildcard/NSEC
//!   semantics, the load pipeline, re-sign scheduling, and the glue
//!   cache.
//! * [`proxy2`]: a self-contained PROXY protocol v2 parser and emitter
//!   for classifying inbound connections before any DNS processing.
//!
//! What it is not: a resolver, a wire-protocol implementation, a zone
//! file parser, or a transfer engine. Those live next door and talk to
//! this crate through [`db::ZoneDb`]'s method surface.
//!
//! [`Name`]: base::Name

pub mod base;
pub mod db;
pub mod proxy2;
pub mod runtime;
pub mod slab;
pub mod tree;

pub use self::base::{Class, Name, Rtype, Trust};
pub use self::db::{ZoneDb, ZoneKind};
pub use self::runtime::Runtime;
