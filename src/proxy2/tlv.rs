//! Iterating the TLV payload of a parsed header.
//!
//! TLV walks are stateless passes over the committed region a handler
//! (or a peer) produced; nothing here keeps parse state.

use super::{Proxy2Error, TlvType, TLV_HEADER_SIZE};

//------------ Tlv -----------------------------------------------------------

/// One decoded TLV.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tlv<'a> {
    pub tlv_type: TlvType,
    pub data: &'a [u8],
}

//------------ TlvIter -------------------------------------------------------

/// Iterates the TLVs in a region.
///
/// Malformed framing yields one `Err(Range)` and ends the iteration.
#[derive(Clone, Debug)]
pub struct TlvIter<'a> {
    data: &'a [u8],
    failed: bool,
}

impl<'a> TlvIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        TlvIter {
            data,
            failed: false,
        }
    }
}

impl<'a> Iterator for TlvIter<'a> {
    type Item = Result<Tlv<'a>, Proxy2Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.data.is_empty() {
            return None;
        }
        if self.data.len() < TLV_HEADER_SIZE {
            self.failed = true;
            return Some(Err(Proxy2Error::Range));
        }
        let tlv_type = TlvType::from_int(self.data[0]);
        let len = usize::from(u16::from_be_bytes([self.data[1], self.data[2]]));
        if self.data.len() < TLV_HEADER_SIZE + len {
            self.failed = true;
            return Some(Err(Proxy2Error::Range));
        }
        let data = &self.data[TLV_HEADER_SIZE..TLV_HEADER_SIZE + len];
        self.data = &self.data[TLV_HEADER_SIZE + len..];
        Some(Ok(Tlv { tlv_type, data }))
    }
}

/// Verifies that a region is a well-formed TLV sequence.
pub fn verify_tlv_data(data: &[u8]) -> Result<(), Proxy2Error> {
    for tlv in TlvIter::new(data) {
        tlv?;
    }
    Ok(())
}

//------------ TlsTlv --------------------------------------------------------

/// The decoded fixed part of a TLS TLV.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TlsTlv<'a> {
    /// Bit-set of [`tls_client`] flags.
    ///
    /// [`tls_client`]: super::tls_client
    pub client_flags: u8,

    /// Whether the client certificate verified successfully.
    pub client_cert_verified: bool,

    subtlvs: &'a [u8],
}

impl<'a> TlsTlv<'a> {
    /// Decodes the value of a [`TlvType::Tls`] TLV.
    ///
    /// [`TlvType::Tls`]: super::TlvType::Tls
    pub fn parse(data: &'a [u8]) -> Result<Self, Proxy2Error> {
        if data.len() < 5 {
            return Err(Proxy2Error::Range);
        }
        let verify = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
        Ok(TlsTlv {
            client_flags: data[0],
            client_cert_verified: verify == 0,
            subtlvs: &data[5..],
        })
    }

    /// Iterates the sub-TLVs (version, CN, cipher, algorithms).
    pub fn sub_tlvs(&self) -> SubTlvIter<'a> {
        SubTlvIter {
            inner: TlvIter::new(self.subtlvs),
        }
    }
}

//------------ SubTlvIter ----------------------------------------------------

/// Iterates the sub-TLVs of a TLS TLV.
///
/// Sub-TLV types are raw octets (see [`tls_subtype`]); the framing is
/// the same as for top-level TLVs.
///
/// [`tls_subtype`]: super::tls_subtype
#[derive(Clone, Debug)]
pub struct SubTlvIter<'a> {
    inner: TlvIter<'a>,
}

impl<'a> Iterator for SubTlvIter<'a> {
    type Item = Result<(u8, &'a [u8]), Proxy2Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|tlv| tlv.map(|tlv| (tlv.tlv_type.to_int(), tlv.data)))
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::super::{append_tlv, tls_subtype};
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn iterates_tlvs() {
        let mut buf = BytesMut::new();
        append_tlv(&mut buf, TlvType::Alpn.to_int(), b"dot").unwrap();
        append_tlv(&mut buf, TlvType::UniqueId.to_int(), b"abc").unwrap();

        let tlvs: Vec<Tlv<'_>> =
            TlvIter::new(&buf).collect::<Result<_, _>>().unwrap();
        assert_eq!(tlvs.len(), 2);
        assert_eq!(tlvs[0].tlv_type, TlvType::Alpn);
        assert_eq!(tlvs[0].data, b"dot");
        assert_eq!(tlvs[1].tlv_type, TlvType::UniqueId);
        assert_eq!(tlvs[1].data, b"abc");
        assert!(verify_tlv_data(&buf).is_ok());
    }

    #[test]
    fn truncated_tlv_is_range() {
        let data = [0x01, 0x00, 0x05, b'x'];
        assert_eq!(verify_tlv_data(&data), Err(Proxy2Error::Range));
        let mut iter = TlvIter::new(&data);
        assert_eq!(iter.next(), Some(Err(Proxy2Error::Range)));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn tls_subtlvs() {
        let mut subs = BytesMut::new();
        append_tlv(&mut subs, tls_subtype::VERSION, b"TLSv1.3").unwrap();
        append_tlv(&mut subs, tls_subtype::CIPHER, b"AES").unwrap();

        let mut value = vec![super::super::tls_client::TLS, 0, 0, 0, 0];
        value.extend_from_slice(&subs);

        let tls = TlsTlv::parse(&value).unwrap();
        assert!(tls.client_cert_verified);
        assert_eq!(tls.client_flags, super::super::tls_client::TLS);
        let subs: Vec<(u8, &[u8])> =
            tls.sub_tlvs().collect::<Result<_, _>>().unwrap();
        assert_eq!(
            subs,
            [
                (tls_subtype::VERSION, b"TLSv1.3".as_slice()),
                (tls_subtype::CIPHER, b"AES".as_slice()),
            ]
        );
    }

    #[test]
    fn unverified_certificate() {
        let value = [0u8, 0, 0, 0, 1];
        let tls = TlsTlv::parse(&value).unwrap();
        assert!(!tls.client_cert_verified);
        assert!(TlsTlv::parse(&value[..3]).is_err());
    }
}
