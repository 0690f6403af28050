//! The PROXY protocol, version 2.
//!
//! Connections arriving through a proxy carry a binary preamble naming
//! the original endpoints before any payload. This module decodes such
//! headers from arbitrarily fragmented streams ([`handler`]), iterates
//! their TLV payload ([`tlv`]), and writes headers of its own
//! ([`emit`]). It is self-contained: nothing here touches the zone
//! database or any networking code.

pub mod emit;
pub mod handler;
pub mod tlv;

use std::fmt;
use std::net::SocketAddr;

pub use self::emit::{
    append_tlv, append_tlv_string, header_append, header_append_tlv,
    header_append_tlv_string, make_header, make_tls_subheader,
};
pub use self::handler::{Proxy2Event, Proxy2Handler, handle_directly};
pub use self::tlv::{verify_tlv_data, SubTlvIter, Tlv, TlvIter, TlsTlv};

/// The 12-octet signature every PROXYv2 header starts with.
pub const SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];

/// Signature, version/command, family/transport, and length.
pub const HEADER_SIZE: usize = SIGNATURE.len() + 1 + 1 + 2;

/// The largest possible header including its payload.
pub const MAX_SIZE: usize = HEADER_SIZE + u16::MAX as usize;

/// The fixed size of an `AF_UNIX` address.
pub const UNIX_PATH_LEN: usize = 108;

/// `type | length | value` framing overhead of one TLV.
pub const TLV_HEADER_SIZE: usize = 3;

pub(crate) const INET_ADDR_SIZE: usize = 4 + 4 + 2 + 2;
pub(crate) const INET6_ADDR_SIZE: usize = 16 + 16 + 2 + 2;
pub(crate) const UNIX_ADDR_SIZE: usize = UNIX_PATH_LEN * 2;

//------------ Proxy2Command -------------------------------------------------

/// The header's command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Proxy2Command {
    /// Health check or other local traffic; no client addresses.
    Local,

    /// Relayed on behalf of a client whose addresses follow.
    Proxy,
}

//------------ SockType ------------------------------------------------------

/// The original connection's socket type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SockType {
    Unspec,
    Stream,
    Dgram,
}

//------------ AddrFamily ----------------------------------------------------

/// The original connection's address family.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddrFamily {
    Unspec,
    Inet,
    Inet6,
    Unix,
}

//------------ PeerAddr ------------------------------------------------------

/// An endpoint address carried in a PROXYv2 header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PeerAddr {
    Inet(SocketAddr),
    Unix(UnixPath),
}

impl PeerAddr {
    pub fn family(&self) -> AddrFamily {
        match self {
            PeerAddr::Inet(SocketAddr::V4(_)) => AddrFamily::Inet,
            PeerAddr::Inet(SocketAddr::V6(_)) => AddrFamily::Inet6,
            PeerAddr::Unix(_) => AddrFamily::Unix,
        }
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        PeerAddr::Inet(addr)
    }
}

//------------ UnixPath ------------------------------------------------------

/// An `AF_UNIX` socket path, at most 108 octets.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UnixPath {
    path: Vec<u8>,
}

impl UnixPath {
    /// Creates a path; fails when it exceeds the wire field.
    pub fn new(path: &[u8]) -> Result<Self, Proxy2Error> {
        if path.len() > UNIX_PATH_LEN {
            return Err(Proxy2Error::Range);
        }
        Ok(UnixPath {
            path: path.to_vec(),
        })
    }

    /// The path without wire padding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.path
    }

    pub(crate) fn from_wire(field: &[u8]) -> Self {
        let end = field
            .iter()
            .position(|&octet| octet == 0)
            .unwrap_or(field.len());
        UnixPath {
            path: field[..end].to_vec(),
        }
    }
}

impl fmt::Display for UnixPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.path))
    }
}

//------------ TlvType -------------------------------------------------------

/// Recognized TLV types.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TlvType {
    /// The upper-layer protocol, as a byte sequence.
    Alpn,

    /// The host name passed by the client, UTF-8.
    Authority,

    /// CRC32c checksum of the whole header.
    Crc32c,

    /// Padding; ignored.
    Noop,

    /// An opaque id unique to the proxied connection.
    UniqueId,

    /// TLS information; carries sub-TLVs.
    Tls,

    /// The network namespace name, US-ASCII.
    Netns,

    /// Anything else, including the custom and experimental ranges.
    Other(u8),
}

impl TlvType {
    pub fn from_int(value: u8) -> Self {
        match value {
            0x01 => TlvType::Alpn,
            0x02 => TlvType::Authority,
            0x03 => TlvType::Crc32c,
            0x04 => TlvType::Noop,
            0x05 => TlvType::UniqueId,
            0x20 => TlvType::Tls,
            0x30 => TlvType::Netns,
            other => TlvType::Other(other),
        }
    }

    pub fn to_int(self) -> u8 {
        match self {
            TlvType::Alpn => 0x01,
            TlvType::Authority => 0x02,
            TlvType::Crc32c => 0x03,
            TlvType::Noop => 0x04,
            TlvType::UniqueId => 0x05,
            TlvType::Tls => 0x20,
            TlvType::Netns => 0x30,
            TlvType::Other(value) => value,
        }
    }
}

//------------ TLS sub-TLV types and client flags ----------------------------

/// Sub-TLV types inside a [`TlvType::Tls`] value.
pub mod tls_subtype {
    /// TLS version, US-ASCII.
    pub const VERSION: u8 = 0x21;
    /// Common Name of the client certificate.
    pub const CN: u8 = 0x22;
    /// Cipher name, e.g. `ECDHE-RSA-AES128-GCM-SHA256`.
    pub const CIPHER: u8 = 0x23;
    /// Signature algorithm of the frontend certificate.
    pub const SIG_ALG: u8 = 0x24;
    /// Key algorithm of the frontend certificate.
    pub const KEY_ALG: u8 = 0x25;
}

/// Client flags inside a [`TlvType::Tls`] value.
pub mod tls_client {
    /// The client connected over TLS.
    pub const TLS: u8 = 0x01;
    /// The client presented a certificate on this connection.
    pub const CERT_CONN: u8 = 0x02;
    /// The client presented a certificate during this TLS session.
    pub const CERT_SESS: u8 = 0x04;
}

//------------ Proxy2Status --------------------------------------------------

/// The outcome of pushing data into a handler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Proxy2Status {
    /// The header is complete and its data has been extracted.
    Success,

    /// Everything pushed so far parsed; more bytes are needed.
    NoMore,

    /// A malformed value was seen; stop reading this connection.
    Unexpected,

    /// A value fell outside its permitted range.
    Range,
}

//------------ Proxy2Error ---------------------------------------------------

/// An emitter or TLV-walk failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Proxy2Error {
    /// The output buffer cannot hold the header.
    NoSpace,

    /// A length field would overflow, or TLV data is malformed.
    Range,

    /// The argument combination is not expressible in a header.
    Unexpected,
}

impl fmt::Display for Proxy2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proxy2Error::NoSpace => write!(f, "no space in output buffer"),
            Proxy2Error::Range => write!(f, "value out of range"),
            Proxy2Error::Unexpected => write!(f, "unexpected value"),
        }
    }
}

impl std::error::Error for Proxy2Error {}
