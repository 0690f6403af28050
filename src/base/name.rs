//! Absolute domain names in uncompressed wire format.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// The maximum length of a name in wire format.
pub const MAX_NAME_LEN: usize = 255;

/// The maximum length of a single label.
pub const MAX_LABEL_LEN: usize = 63;

//------------ Name ----------------------------------------------------------

/// An absolute domain name.
///
/// The name is kept in uncompressed wire format: a sequence of
/// length-prefixed labels terminated by the zero-length root label.
/// Comparison and hashing are case-insensitive on ASCII octets.
#[derive(Clone, Deserialize, Serialize)]
pub struct Name {
    wire: Bytes,
}

impl Name {
    /// Creates the root name.
    pub fn root() -> Self {
        Name {
            wire: Bytes::from_static(b"\0"),
        }
    }

    /// Creates a name from wire format octets, validating the encoding.
    pub fn from_wire(octets: &[u8]) -> Result<Self, NameError> {
        Self::from_bytes(Bytes::copy_from_slice(octets))
    }

    /// Creates a name from wire format octets without copying.
    pub fn from_bytes(wire: Bytes) -> Result<Self, NameError> {
        if wire.len() > MAX_NAME_LEN {
            return Err(NameError::LongName);
        }
        let mut pos = 0;
        loop {
            let Some(&len) = wire.get(pos) else {
                return Err(NameError::BadEncoding);
            };
            let len = len as usize;
            if len > MAX_LABEL_LEN {
                return Err(NameError::LongLabel);
            }
            pos += 1 + len;
            if len == 0 {
                break;
            }
        }
        if pos != wire.len() {
            return Err(NameError::BadEncoding);
        }
        Ok(Name { wire })
    }

    /// Returns the wire format octets.
    pub fn as_wire(&self) -> &[u8] {
        &self.wire
    }

    /// Returns the length of the wire encoding.
    pub fn wire_len(&self) -> usize {
        self.wire.len()
    }

    /// Returns whether this is the root name.
    pub fn is_root(&self) -> bool {
        self.wire.len() == 1
    }

    /// Returns the number of labels, including the root label.
    pub fn label_count(&self) -> usize {
        self.iter_labels().count() + 1
    }

    /// Returns an iterator over the labels, leftmost first.
    ///
    /// The terminating root label is not yielded.
    pub fn iter_labels(&self) -> Labels<'_> {
        Labels {
            wire: &self.wire,
            pos: 0,
        }
    }

    /// Returns the leftmost label, or `None` for the root name.
    pub fn first_label(&self) -> Option<&[u8]> {
        self.iter_labels().next()
    }

    /// Returns the name with the leftmost `n` labels removed.
    ///
    /// Returns `None` if the name has fewer than `n` non-root labels.
    pub fn strip_left(&self, n: usize) -> Option<Self> {
        let mut pos = 0;
        for _ in 0..n {
            let len = *self.wire.get(pos)? as usize;
            if len == 0 {
                return None;
            }
            pos += 1 + len;
        }
        Some(Name {
            wire: self.wire.slice(pos..),
        })
    }

    /// Returns the parent name, or `None` for the root name.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            self.strip_left(1)
        }
    }

    /// Returns whether the leftmost label is the wildcard label `*`.
    pub fn is_wildcard(&self) -> bool {
        self.wire.len() >= 2 && self.wire[0] == 1 && self.wire[1] == b'*'
    }

    /// Returns whether any label of the name is the wildcard label `*`.
    pub fn contains_wildcard(&self) -> bool {
        self.iter_labels().any(|label| label == b"*")
    }

    /// Returns `*.self`.
    pub fn to_wildcard(&self) -> Result<Self, NameError> {
        if self.wire.len() + 2 > MAX_NAME_LEN {
            return Err(NameError::LongName);
        }
        let mut wire = Vec::with_capacity(self.wire.len() + 2);
        wire.extend_from_slice(b"\x01*");
        wire.extend_from_slice(&self.wire);
        Ok(Name { wire: wire.into() })
    }

    /// Returns whether `self` is equal to or a subdomain of `other`.
    pub fn is_subdomain(&self, other: &Name) -> bool {
        let tail = other.wire.len();
        if tail > self.wire.len() {
            return false;
        }
        let split = self.wire.len() - tail;
        // The split point must fall on a label boundary of `self`.
        let mut pos = 0;
        while pos < split {
            pos += 1 + self.wire[pos] as usize;
        }
        pos == split
            && self.wire[split..].eq_ignore_ascii_case(&other.wire)
    }

    /// Compares two names in DNSSEC canonical order.
    pub fn canonical_cmp(&self, other: &Name) -> Ordering {
        let left: SmallVec<[&[u8]; 16]> = self.iter_labels().collect();
        let right: SmallVec<[&[u8]; 16]> = other.iter_labels().collect();
        for (a, b) in left.iter().rev().zip(right.iter().rev()) {
            let mut ai = a.iter().map(u8::to_ascii_lowercase);
            let mut bi = b.iter().map(u8::to_ascii_lowercase);
            loop {
                match (ai.next(), bi.next()) {
                    (Some(x), Some(y)) => match x.cmp(&y) {
                        Ordering::Equal => continue,
                        other => return other,
                    },
                    (Some(_), None) => return Ordering::Greater,
                    (None, Some(_)) => return Ordering::Less,
                    (None, None) => break,
                }
            }
        }
        left.len().cmp(&right.len())
    }

    /// Returns the canonical-order tree key for this name.
    ///
    /// Labels are emitted root-side first and lowercased, with each label
    /// terminated by `0x00`. The octets `0x00` and `0x01` inside a label
    /// are escaped as `0x01 0x01` and `0x01 0x02` so plain lexicographic
    /// byte order of keys equals canonical name order, and the key of an
    /// ancestor is a strict prefix of the keys of all of its descendants.
    pub fn tree_key(&self) -> Vec<u8> {
        let labels: SmallVec<[&[u8]; 16]> = self.iter_labels().collect();
        let mut key = Vec::with_capacity(self.wire.len() + 2);
        for label in labels.iter().rev() {
            for &octet in label.iter() {
                match octet {
                    0x00 => key.extend_from_slice(&[0x01, 0x01]),
                    0x01 => key.extend_from_slice(&[0x01, 0x02]),
                    _ => key.push(octet.to_ascii_lowercase()),
                }
            }
            key.push(0x00);
        }
        key
    }
}

//--- PartialEq, Eq, Hash

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        // Length octets are below 0x40 and thus never fold, so a
        // case-insensitive comparison of the raw wire data is exact.
        self.wire.eq_ignore_ascii_case(&other.wire)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for octet in self.wire.iter() {
            state.write_u8(octet.to_ascii_lowercase());
        }
    }
}

//--- PartialOrd, Ord

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical_cmp(other)
    }
}

//--- FromStr

impl FromStr for Name {
    type Err = NameError;

    /// Parses a dotted presentation name.
    ///
    /// Only plain labels are supported; this is not a master file parser.
    /// Relative names are treated as absolute.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "." {
            return Ok(Name::root());
        }
        let s = s.strip_suffix('.').unwrap_or(s);
        let mut wire = Vec::with_capacity(s.len() + 2);
        for label in s.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(NameError::BadLabel);
            }
            wire.push(label.len() as u8);
            wire.extend_from_slice(label.as_bytes());
        }
        wire.push(0);
        if wire.len() > MAX_NAME_LEN {
            return Err(NameError::LongName);
        }
        Ok(Name { wire: wire.into() })
    }
}

//--- Display, Debug

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for label in self.iter_labels() {
            for &octet in label {
                match octet {
                    b'.' | b'\\' => write!(f, "\\{}", octet as char)?,
                    0x21..=0x7e => write!(f, "{}", octet as char)?,
                    _ => write!(f, "\\{:03}", octet)?,
                }
            }
            f.write_str(".")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self)
    }
}

//------------ Labels --------------------------------------------------------

/// An iterator over the labels of a name, leftmost first.
#[derive(Clone)]
pub struct Labels<'a> {
    wire: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Labels<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let len = *self.wire.get(self.pos)? as usize;
        if len == 0 {
            return None;
        }
        let start = self.pos + 1;
        self.pos = start + len;
        Some(&self.wire[start..self.pos])
    }
}

//------------ NameError -----------------------------------------------------

/// A name could not be constructed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NameError {
    /// The wire encoding exceeds 255 octets.
    LongName,

    /// A label exceeds 63 octets.
    LongLabel,

    /// A label is empty or otherwise malformed.
    BadLabel,

    /// The wire encoding is truncated or has trailing data.
    BadEncoding,
}

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameError::LongName => write!(f, "name too long"),
            NameError::LongLabel => write!(f, "label too long"),
            NameError::BadLabel => write!(f, "bad label"),
            NameError::BadEncoding => write!(f, "bad wire encoding"),
        }
    }
}

impl std::error::Error for NameError {}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(name("example.").to_string(), "example.");
        assert_eq!(name("a.b.example").to_string(), "a.b.example.");
        assert_eq!(Name::root().to_string(), ".");
        assert_eq!(name("*.example.").to_string(), "*.example.");
    }

    #[test]
    fn wire_round_trip() {
        let n = name("ns1.example.");
        let parsed = Name::from_wire(n.as_wire()).unwrap();
        assert_eq!(n, parsed);
        assert!(Name::from_wire(b"\x03abc").is_err());
        assert!(Name::from_wire(b"\x03abc\x00junk").is_err());
    }

    #[test]
    fn case_insensitive_equality() {
        assert_eq!(name("Example."), name("eXaMpLe."));
        let mut set = std::collections::HashSet::new();
        set.insert(name("WWW.Example."));
        assert!(set.contains(&name("www.example.")));
    }

    #[test]
    fn subdomain() {
        assert!(name("a.example.").is_subdomain(&name("example.")));
        assert!(name("example.").is_subdomain(&name("example.")));
        assert!(name("a.example.").is_subdomain(&Name::root()));
        assert!(!name("example.").is_subdomain(&name("a.example.")));
        // "aaexample." must not match a label boundary inside "a.example."
        assert!(!name("aaexample.").is_subdomain(&name("example.")));
    }

    #[test]
    fn parent_and_strip() {
        assert_eq!(name("a.b.example.").parent().unwrap(), name("b.example."));
        assert_eq!(name("a.b.example.").strip_left(2).unwrap(), name("example."));
        assert!(Name::root().parent().is_none());
    }

    #[test]
    fn wildcard() {
        assert!(name("*.example.").is_wildcard());
        assert!(!name("a.example.").is_wildcard());
        assert!(name("a.*.example.").contains_wildcard());
        assert_eq!(name("example.").to_wildcard().unwrap(), name("*.example."));
    }

    #[test]
    fn canonical_order() {
        // RFC 4034, section 6.1 example ordering.
        let ordered = [
            "example.",
            "a.example.",
            "yljkjljk.a.example.",
            "Z.a.example.",
            "zABC.a.EXAMPLE.",
            "z.example.",
            "\\001.z.example.",
            "*.z.example.",
            "\\200.z.example.",
        ];
        let names: Vec<Name> = ordered
            .iter()
            .map(|s| {
                // Resolve the \DDD escapes used above by hand.
                match *s {
                    "\\001.z.example." => Name::from_wire(
                        b"\x01\x01\x01z\x07example\x00",
                    )
                    .unwrap(),
                    "\\200.z.example." => Name::from_wire(
                        b"\x01\xc8\x01z\x07example\x00",
                    )
                    .unwrap(),
                    other => other.parse().unwrap(),
                }
            })
            .collect();
        for window in names.windows(2) {
            assert_eq!(
                window[0].canonical_cmp(&window[1]),
                Ordering::Less,
                "{} < {}",
                window[0],
                window[1]
            );
            assert!(
                window[0].tree_key() < window[1].tree_key(),
                "key order {} < {}",
                window[0],
                window[1]
            );
        }
    }

    #[test]
    fn tree_key_prefix_matches_subdomain() {
        let parent = name("example.");
        let child = name("a.b.example.");
        assert!(child.tree_key().starts_with(&parent.tree_key()));
        assert!(!name("ample.").tree_key().starts_with(&parent.tree_key()));
    }
}
