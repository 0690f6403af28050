//! Writing PROXYv2 headers.
//!
//! The inverse of the [`handler`]: signature, version and command,
//! family and transport, length, the per-family address block, and then
//! TLVs appended while the length field is kept current in place.
//!
//! [`handler`]: super::handler

use std::net::SocketAddr;

use bytes::{BufMut, BytesMut};

use super::{
    PeerAddr, Proxy2Command, Proxy2Error, SockType, HEADER_SIZE, SIGNATURE,
    TLV_HEADER_SIZE, UNIX_PATH_LEN,
};

/// Writes a complete PROXYv2 header into `out`.
///
/// A LOCAL command carries neither addresses nor a socket type. A PROXY
/// command without addresses is emitted with the unspecified family;
/// otherwise both addresses must be present and of the same family.
pub fn make_header(
    out: &mut BytesMut,
    cmd: Proxy2Command,
    socktype: SockType,
    src: Option<&PeerAddr>,
    dst: Option<&PeerAddr>,
    tlvs: Option<&[u8]>,
) -> Result<(), Proxy2Error> {
    if cmd == Proxy2Command::Local
        && (socktype != SockType::Unspec || src.is_some() || dst.is_some())
    {
        return Err(Proxy2Error::Unexpected);
    }
    let (family, addr_size) = match (src, dst) {
        (None, None) => (0u8, 0usize),
        (Some(src), Some(dst)) => {
            if src.family() != dst.family() {
                return Err(Proxy2Error::Unexpected);
            }
            match src {
                PeerAddr::Inet(SocketAddr::V4(_)) => (1, 4 + 4 + 2 + 2),
                PeerAddr::Inet(SocketAddr::V6(_)) => (2, 16 + 16 + 2 + 2),
                PeerAddr::Unix(_) => (3, UNIX_PATH_LEN * 2),
            }
        }
        _ => return Err(Proxy2Error::Unexpected),
    };

    let tlv_len = tlvs.map_or(0, <[u8]>::len);
    let data_len = addr_size + tlv_len;
    if data_len > usize::from(u16::MAX) {
        return Err(Proxy2Error::Range);
    }

    out.put_slice(&SIGNATURE);
    out.put_u8(0x20
        | match cmd {
            Proxy2Command::Local => 0,
            Proxy2Command::Proxy => 1,
        });
    out.put_u8((family << 4)
        | match socktype {
            SockType::Unspec => 0,
            SockType::Stream => 1,
            SockType::Dgram => 2,
        });
    out.put_u16(data_len as u16);

    if let (Some(src), Some(dst)) = (src, dst) {
        put_addresses(out, src, dst)?;
    }
    if let Some(tlvs) = tlvs {
        out.put_slice(tlvs);
    }
    Ok(())
}

fn put_addresses(
    out: &mut BytesMut,
    src: &PeerAddr,
    dst: &PeerAddr,
) -> Result<(), Proxy2Error> {
    match (src, dst) {
        (
            PeerAddr::Inet(SocketAddr::V4(src)),
            PeerAddr::Inet(SocketAddr::V4(dst)),
        ) => {
            out.put_slice(&src.ip().octets());
            out.put_slice(&dst.ip().octets());
            out.put_u16(src.port());
            out.put_u16(dst.port());
        }
        (
            PeerAddr::Inet(SocketAddr::V6(src)),
            PeerAddr::Inet(SocketAddr::V6(dst)),
        ) => {
            out.put_slice(&src.ip().octets());
            out.put_slice(&dst.ip().octets());
            out.put_u16(src.port());
            out.put_u16(dst.port());
        }
        (PeerAddr::Unix(src), PeerAddr::Unix(dst)) => {
            for path in [src, dst] {
                let bytes = path.as_bytes();
                out.put_slice(bytes);
                out.put_bytes(0, UNIX_PATH_LEN - bytes.len());
            }
        }
        _ => return Err(Proxy2Error::Unexpected),
    }
    Ok(())
}

/// Appends raw data to a finished header, updating its length field.
///
/// This is the foundation of TLV appending; it also serves to add an
/// opaque address block to an unspecified-family header.
pub fn header_append(
    out: &mut BytesMut,
    data: &[u8],
) -> Result<(), Proxy2Error> {
    if out.len() < HEADER_SIZE || out[..SIGNATURE.len()] != SIGNATURE {
        return Err(Proxy2Error::Unexpected);
    }
    let old_len =
        usize::from(u16::from_be_bytes([out[14], out[15]]));
    let new_len = old_len + data.len();
    if new_len > usize::from(u16::MAX) {
        return Err(Proxy2Error::Range);
    }
    out.put_slice(data);
    out[14..16].copy_from_slice(&(new_len as u16).to_be_bytes());
    Ok(())
}

/// Appends one TLV to a finished header, updating its length field.
pub fn header_append_tlv(
    out: &mut BytesMut,
    tlv_type: u8,
    data: &[u8],
) -> Result<(), Proxy2Error> {
    if data.len() > usize::from(u16::MAX) {
        return Err(Proxy2Error::Range);
    }
    let mut tlv = Vec::with_capacity(TLV_HEADER_SIZE + data.len());
    tlv.push(tlv_type);
    tlv.extend_from_slice(&(data.len() as u16).to_be_bytes());
    tlv.extend_from_slice(data);
    header_append(out, &tlv)
}

/// Appends a string TLV to a finished header.
pub fn header_append_tlv_string(
    out: &mut BytesMut,
    tlv_type: u8,
    value: &str,
) -> Result<(), Proxy2Error> {
    header_append_tlv(out, tlv_type, value.as_bytes())
}

/// Appends one TLV to a bare buffer, without touching any header.
///
/// Used to build sub-TLV sequences before wrapping them.
pub fn append_tlv(
    out: &mut BytesMut,
    tlv_type: u8,
    data: &[u8],
) -> Result<(), Proxy2Error> {
    if data.len() > usize::from(u16::MAX) {
        return Err(Proxy2Error::Range);
    }
    out.put_u8(tlv_type);
    out.put_u16(data.len() as u16);
    out.put_slice(data);
    Ok(())
}

/// Appends a string TLV to a bare buffer.
pub fn append_tlv_string(
    out: &mut BytesMut,
    tlv_type: u8,
    value: &str,
) -> Result<(), Proxy2Error> {
    append_tlv(out, tlv_type, value.as_bytes())
}

/// Builds the value of a TLS TLV: client flags, the certificate verify
/// word, and any sub-TLVs.
pub fn make_tls_subheader(
    out: &mut BytesMut,
    client_flags: u8,
    client_cert_verified: bool,
    subtlvs: Option<&[u8]>,
) -> Result<(), Proxy2Error> {
    let sub_len = subtlvs.map_or(0, <[u8]>::len);
    if 1 + 4 + sub_len > usize::from(u16::MAX) {
        return Err(Proxy2Error::Range);
    }
    out.put_u8(client_flags);
    out.put_u32(u32::from(!client_cert_verified));
    if let Some(subtlvs) = subtlvs {
        out.put_slice(subtlvs);
    }
    Ok(())
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy2::TlvType;

    fn inet(addr: &str) -> PeerAddr {
        PeerAddr::Inet(addr.parse().unwrap())
    }

    #[test]
    fn local_header_is_minimal() {
        let mut out = BytesMut::new();
        make_header(
            &mut out,
            Proxy2Command::Local,
            SockType::Unspec,
            None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(out.len(), HEADER_SIZE);
        assert_eq!(out[12], 0x20);
        assert_eq!(out[13], 0x00);
        assert_eq!(&out[14..16], &[0, 0]);
    }

    #[test]
    fn local_with_addresses_is_rejected() {
        let mut out = BytesMut::new();
        let src = inet("10.0.0.1:1234");
        let dst = inet("10.0.0.2:53");
        assert_eq!(
            make_header(
                &mut out,
                Proxy2Command::Local,
                SockType::Stream,
                Some(&src),
                Some(&dst),
                None,
            ),
            Err(Proxy2Error::Unexpected)
        );
    }

    #[test]
    fn mismatched_families_are_rejected() {
        let mut out = BytesMut::new();
        let src = inet("10.0.0.1:1234");
        let dst = inet("[2001:db8::1]:53");
        assert_eq!(
            make_header(
                &mut out,
                Proxy2Command::Proxy,
                SockType::Stream,
                Some(&src),
                Some(&dst),
                None,
            ),
            Err(Proxy2Error::Unexpected)
        );
    }

    #[test]
    fn tlv_append_updates_length_in_place() {
        let mut out = BytesMut::new();
        let src = inet("10.0.0.1:1234");
        let dst = inet("10.0.0.2:53");
        make_header(
            &mut out,
            Proxy2Command::Proxy,
            SockType::Stream,
            Some(&src),
            Some(&dst),
            None,
        )
        .unwrap();
        let before = u16::from_be_bytes([out[14], out[15]]);

        header_append_tlv_string(&mut out, TlvType::Netns.to_int(), "blue")
            .unwrap();
        let after = u16::from_be_bytes([out[14], out[15]]);
        assert_eq!(after, before + 3 + 4);
        assert_eq!(out.len(), HEADER_SIZE + usize::from(after));
    }
}
