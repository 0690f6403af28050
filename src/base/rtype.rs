//! Record types, type pairs, classes, and trust levels.

use std::fmt;

use serde::{Deserialize, Serialize};

//------------ Rtype ---------------------------------------------------------

/// A DNS resource record type.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Rtype(u16);

impl Rtype {
    pub const NONE: Rtype = Rtype(0);
    pub const A: Rtype = Rtype(1);
    pub const NS: Rtype = Rtype(2);
    pub const CNAME: Rtype = Rtype(5);
    pub const SOA: Rtype = Rtype(6);
    pub const MX: Rtype = Rtype(15);
    pub const TXT: Rtype = Rtype(16);
    pub const KEY: Rtype = Rtype(25);
    pub const AAAA: Rtype = Rtype(28);
    pub const SRV: Rtype = Rtype(33);
    pub const DNAME: Rtype = Rtype(39);
    pub const DS: Rtype = Rtype(43);
    pub const RRSIG: Rtype = Rtype(46);
    pub const NSEC: Rtype = Rtype(47);
    pub const DNSKEY: Rtype = Rtype(48);
    pub const NSEC3: Rtype = Rtype(50);
    pub const NSEC3PARAM: Rtype = Rtype(51);
    pub const ANY: Rtype = Rtype(255);

    pub const fn from_int(value: u16) -> Self {
        Rtype(value)
    }

    pub const fn to_int(self) -> u16 {
        self.0
    }

    /// Returns whether records of this type live at the parent side of a
    /// zone cut.
    pub fn at_parent(self) -> bool {
        matches!(self, Rtype::DS)
    }

    /// Returns whether this type creates a zone cut when not at the apex.
    pub fn is_delegating(self) -> bool {
        matches!(self, Rtype::NS | Rtype::DNAME)
    }
}

impl fmt::Display for Rtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Rtype::A => write!(f, "A"),
            Rtype::NS => write!(f, "NS"),
            Rtype::CNAME => write!(f, "CNAME"),
            Rtype::SOA => write!(f, "SOA"),
            Rtype::MX => write!(f, "MX"),
            Rtype::TXT => write!(f, "TXT"),
            Rtype::KEY => write!(f, "KEY"),
            Rtype::AAAA => write!(f, "AAAA"),
            Rtype::SRV => write!(f, "SRV"),
            Rtype::DNAME => write!(f, "DNAME"),
            Rtype::DS => write!(f, "DS"),
            Rtype::RRSIG => write!(f, "RRSIG"),
            Rtype::NSEC => write!(f, "NSEC"),
            Rtype::DNSKEY => write!(f, "DNSKEY"),
            Rtype::NSEC3 => write!(f, "NSEC3"),
            Rtype::NSEC3PARAM => write!(f, "NSEC3PARAM"),
            Rtype::ANY => write!(f, "ANY"),
            Rtype(value) => write!(f, "TYPE{}", value),
        }
    }
}

//------------ TypePair ------------------------------------------------------

/// A record type together with the type it covers.
///
/// Headers are keyed by this pair: an RRSIG set is stored under
/// `(RRSIG, covered)` while every other set is stored under `(type, NONE)`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TypePair {
    base: Rtype,
    covers: Rtype,
}

impl TypePair {
    /// The pair for a plain, non-signature rdataset.
    pub const fn exact(base: Rtype) -> Self {
        TypePair {
            base,
            covers: Rtype::NONE,
        }
    }

    /// The pair for the signature rdataset covering `covered`.
    pub const fn sig(covered: Rtype) -> Self {
        TypePair {
            base: Rtype::RRSIG,
            covers: covered,
        }
    }

    pub const fn new(base: Rtype, covers: Rtype) -> Self {
        TypePair { base, covers }
    }

    pub fn base(self) -> Rtype {
        self.base
    }

    pub fn covers(self) -> Rtype {
        self.covers
    }

    /// Returns whether this is a signature rdataset.
    pub fn is_sig(self) -> bool {
        self.base == Rtype::RRSIG
    }
}

impl fmt::Display for TypePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sig() {
            write!(f, "RRSIG({})", self.covers)
        } else {
            self.base.fmt(f)
        }
    }
}

//------------ Class ---------------------------------------------------------

/// A DNS class.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    Serialize,
)]
pub struct Class(u16);

impl Class {
    pub const IN: Class = Class(1);
    pub const CH: Class = Class(3);
    pub const HS: Class = Class(4);

    pub const fn from_int(value: u16) -> Self {
        Class(value)
    }

    pub const fn to_int(self) -> u16 {
        self.0
    }
}

impl Default for Class {
    fn default() -> Self {
        Class::IN
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Class::IN => write!(f, "IN"),
            Class::CH => write!(f, "CH"),
            Class::HS => write!(f, "HS"),
            Class(value) => write!(f, "CLASS{}", value),
        }
    }
}

//------------ Trust ---------------------------------------------------------

/// How believable an rdataset is.
///
/// Stored once per slab header. The ladder matters for merges: data is
/// never downgraded by merging in less trusted records.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Trust {
    /// Not yet initialized.
    None,
    /// Received in the additional section of a response.
    AdditionalData,
    /// Received in a referral.
    Glue,
    /// Received in the answer section of a non-authoritative response.
    Answer,
    /// Received in the authority section of an authoritative response.
    Authority,
    /// Loaded from, or generated for, the zone itself.
    Ultimate,
}

impl Default for Trust {
    fn default() -> Self {
        Trust::None
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_pairs() {
        assert_eq!(TypePair::exact(Rtype::NS).base(), Rtype::NS);
        assert!(TypePair::sig(Rtype::NSEC).is_sig());
        assert_eq!(TypePair::sig(Rtype::NSEC).covers(), Rtype::NSEC);
        assert_ne!(TypePair::exact(Rtype::RRSIG), TypePair::sig(Rtype::A));
        assert_eq!(TypePair::sig(Rtype::A).to_string(), "RRSIG(A)");
    }

    #[test]
    fn display() {
        assert_eq!(Rtype::NSEC3PARAM.to_string(), "NSEC3PARAM");
        assert_eq!(Rtype::from_int(4711).to_string(), "TYPE4711");
        assert_eq!(Class::IN.to_string(), "IN");
    }

    #[test]
    fn predicates() {
        assert!(Rtype::DS.at_parent());
        assert!(!Rtype::NS.at_parent());
        assert!(Rtype::NS.is_delegating());
        assert!(Rtype::DNAME.is_delegating());
        assert!(!Rtype::A.is_delegating());
    }
}
