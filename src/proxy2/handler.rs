//! The resumable PROXYv2 header parser.
//!
//! Stream transports may deliver a header in arbitrary fragments, so
//! the parser is a state machine: bytes are pushed in as they arrive,
//! each state waits for its watermark, and the user callback is told
//! after every push whether the header completed, needs more data, or
//! is broken. Nothing is read ahead of verification: parsing stops at
//! the first ill-formed value.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use bytes::BytesMut;

use super::tlv::verify_tlv_data;
use super::{
    AddrFamily, PeerAddr, Proxy2Command, Proxy2Status, SockType, UnixPath,
    HEADER_SIZE, INET6_ADDR_SIZE, INET_ADDR_SIZE, SIGNATURE, UNIX_ADDR_SIZE,
    UNIX_PATH_LEN,
};

//------------ Proxy2Event ---------------------------------------------------

/// What a handler tells its callback after a push.
///
/// Everything other than `status` is meaningful only when `status` is
/// [`Proxy2Status::Success`].
#[derive(Debug)]
pub struct Proxy2Event<'a> {
    pub status: Proxy2Status,
    pub cmd: Option<Proxy2Command>,
    pub socktype: Option<SockType>,
    pub src: Option<&'a PeerAddr>,
    pub dst: Option<&'a PeerAddr>,

    /// The TLV region of the completed header.
    pub tlv_data: &'a [u8],

    /// Bytes past the header; payload of the proxied connection.
    pub extra: &'a [u8],
}

//------------ State ---------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Signature,
    VerCmd,
    ProtoFam,
    Len,
    Addrs,
    Tlvs,
    Done,
    Failed,
}

//------------ Proxy2Handler -------------------------------------------------

/// A per-connection PROXYv2 parser.
pub struct Proxy2Handler<'cb> {
    buf: BytesMut,
    state: State,
    max_size: usize,

    cb: Box<dyn FnMut(&Proxy2Event<'_>) + 'cb>,
    calling_cb: bool,
    result: Option<Proxy2Status>,

    cmd: Option<Proxy2Command>,
    family: AddrFamily,
    socktype: Option<SockType>,
    src: Option<PeerAddr>,
    dst: Option<PeerAddr>,

    /// Total header size including the payload, known after `Len`.
    header_size: usize,
    addr_size: usize,
    tlv_start: usize,
    tlv_len: usize,
}

impl<'cb> Proxy2Handler<'cb> {
    /// Creates a handler.
    ///
    /// `max_size` bounds the whole header including its payload; zero
    /// means unlimited. The callback fires exactly once per push.
    pub fn new(
        max_size: usize,
        cb: impl FnMut(&Proxy2Event<'_>) + 'cb,
    ) -> Self {
        assert!(
            max_size == 0 || max_size >= HEADER_SIZE,
            "max_size must be 0 or at least the fixed header size"
        );
        Proxy2Handler {
            buf: BytesMut::new(),
            state: State::Signature,
            max_size,
            cb: Box::new(cb),
            calling_cb: false,
            result: None,
            cmd: None,
            family: AddrFamily::Unspec,
            socktype: None,
            src: None,
            dst: None,
            header_size: 0,
            addr_size: 0,
            tlv_start: 0,
            tlv_len: 0,
        }
    }

    /// Replaces the data processing callback.
    pub fn set_callback(
        &mut self,
        cb: impl FnMut(&Proxy2Event<'_>) + 'cb,
    ) {
        self.cb = Box::new(cb);
    }

    /// Returns the handler to its initial state, dropping all data.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.state = State::Signature;
        self.result = None;
        self.cmd = None;
        self.family = AddrFamily::Unspec;
        self.socktype = None;
        self.src = None;
        self.dst = None;
        self.header_size = 0;
        self.addr_size = 0;
        self.tlv_start = 0;
        self.tlv_len = 0;
    }

    /// Pushes the next chunk of the stream into the parser.
    ///
    /// Fires the callback once with the processing status. Pushing from
    /// within the callback is a programming error and panics. Bytes
    /// pushed after completion accumulate as extra data without firing
    /// the callback again; pushes after a failure report the failure.
    pub fn push(&mut self, data: &[u8]) -> Proxy2Status {
        assert!(
            !self.calling_cb,
            "recursive push into a PROXYv2 handler"
        );
        match self.state {
            State::Done => {
                self.buf.extend_from_slice(data);
                return Proxy2Status::Success;
            }
            State::Failed => {
                return self.result.unwrap_or(Proxy2Status::Unexpected);
            }
            _ => {}
        }

        self.buf.extend_from_slice(data);
        let status = self.advance();
        self.result = Some(status);
        self.fire(status);
        status
    }

    /// Returns the status last passed to the callback.
    pub fn result(&self) -> Option<Proxy2Status> {
        self.result
    }

    /// Returns the complete header as received, e.g. for forwarding.
    pub fn header(&self) -> Option<&[u8]> {
        (self.state == State::Done).then(|| &self.buf[..self.header_size])
    }

    /// Returns the TLV region of the completed header.
    pub fn tlv_data(&self) -> Option<&[u8]> {
        (self.state == State::Done)
            .then(|| &self.buf[self.tlv_start..self.tlv_start + self.tlv_len])
    }

    /// Returns the bytes past the completed header.
    pub fn extra(&self) -> Option<&[u8]> {
        (self.state == State::Done).then(|| &self.buf[self.header_size..])
    }

    /// Returns the decoded socket type and addresses.
    pub fn addresses(
        &self,
    ) -> Option<(SockType, Option<&PeerAddr>, Option<&PeerAddr>)> {
        if self.state != State::Done {
            return None;
        }
        Some((
            self.socktype.unwrap_or(SockType::Unspec),
            self.src.as_ref(),
            self.dst.as_ref(),
        ))
    }

    fn fail(&mut self, status: Proxy2Status) -> Proxy2Status {
        self.state = State::Failed;
        status
    }

    fn advance(&mut self) -> Proxy2Status {
        loop {
            match self.state {
                State::Signature => {
                    if self.buf.len() < SIGNATURE.len() {
                        return Proxy2Status::NoMore;
                    }
                    if self.buf[..SIGNATURE.len()] != SIGNATURE {
                        return self.fail(Proxy2Status::Unexpected);
                    }
                    self.state = State::VerCmd;
                }
                State::VerCmd => {
                    if self.buf.len() < 13 {
                        return Proxy2Status::NoMore;
                    }
                    let octet = self.buf[12];
                    if octet >> 4 != 2 {
                        return self.fail(Proxy2Status::Unexpected);
                    }
                    self.cmd = match octet & 0x0f {
                        0 => Some(Proxy2Command::Local),
                        1 => Some(Proxy2Command::Proxy),
                        _ => {
                            return self.fail(Proxy2Status::Unexpected);
                        }
                    };
                    self.state = State::ProtoFam;
                }
                State::ProtoFam => {
                    if self.buf.len() < 14 {
                        return Proxy2Status::NoMore;
                    }
                    let octet = self.buf[13];
                    self.family = match octet >> 4 {
                        0 => AddrFamily::Unspec,
                        1 => AddrFamily::Inet,
                        2 => AddrFamily::Inet6,
                        3 => AddrFamily::Unix,
                        _ => return self.fail(Proxy2Status::Range),
                    };
                    self.socktype = match octet & 0x0f {
                        0 => Some(SockType::Unspec),
                        1 => Some(SockType::Stream),
                        2 => Some(SockType::Dgram),
                        _ => return self.fail(Proxy2Status::Range),
                    };
                    self.state = State::Len;
                }
                State::Len => {
                    if self.buf.len() < HEADER_SIZE {
                        return Proxy2Status::NoMore;
                    }
                    let data_len = usize::from(u16::from_be_bytes([
                        self.buf[14],
                        self.buf[15],
                    ]));
                    self.header_size = HEADER_SIZE + data_len;
                    if self.max_size != 0 && self.header_size > self.max_size
                    {
                        return self.fail(Proxy2Status::Range);
                    }
                    self.addr_size = match self.family {
                        AddrFamily::Unspec => 0,
                        AddrFamily::Inet => INET_ADDR_SIZE,
                        AddrFamily::Inet6 => INET6_ADDR_SIZE,
                        AddrFamily::Unix => UNIX_ADDR_SIZE,
                    };
                    if data_len < self.addr_size {
                        return self.fail(Proxy2Status::Unexpected);
                    }
                    self.tlv_start = HEADER_SIZE + self.addr_size;
                    // An unspecified family makes the whole payload
                    // opaque; there are no TLVs to walk.
                    self.tlv_len = if self.family == AddrFamily::Unspec {
                        0
                    } else {
                        data_len - self.addr_size
                    };
                    self.state = State::Addrs;
                }
                State::Addrs => {
                    if self.buf.len() < HEADER_SIZE + self.addr_size {
                        return Proxy2Status::NoMore;
                    }
                    self.decode_addresses();
                    self.state = State::Tlvs;
                }
                State::Tlvs => {
                    if self.buf.len() < self.header_size {
                        return Proxy2Status::NoMore;
                    }
                    let tlv = &self.buf
                        [self.tlv_start..self.tlv_start + self.tlv_len];
                    if verify_tlv_data(tlv).is_err() {
                        return self.fail(Proxy2Status::Range);
                    }
                    self.state = State::Done;
                    return Proxy2Status::Success;
                }
                State::Done | State::Failed => unreachable!(),
            }
        }
    }

    fn decode_addresses(&mut self) {
        let block = &self.buf[HEADER_SIZE..HEADER_SIZE + self.addr_size];
        match self.family {
            AddrFamily::Unspec => {}
            AddrFamily::Inet => {
                let src_ip =
                    Ipv4Addr::new(block[0], block[1], block[2], block[3]);
                let dst_ip =
                    Ipv4Addr::new(block[4], block[5], block[6], block[7]);
                let src_port = u16::from_be_bytes([block[8], block[9]]);
                let dst_port = u16::from_be_bytes([block[10], block[11]]);
                self.src = Some(PeerAddr::Inet(SocketAddr::V4(
                    SocketAddrV4::new(src_ip, src_port),
                )));
                self.dst = Some(PeerAddr::Inet(SocketAddr::V4(
                    SocketAddrV4::new(dst_ip, dst_port),
                )));
            }
            AddrFamily::Inet6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&block[..16]);
                let src_ip = Ipv6Addr::from(octets);
                octets.copy_from_slice(&block[16..32]);
                let dst_ip = Ipv6Addr::from(octets);
                let src_port = u16::from_be_bytes([block[32], block[33]]);
                let dst_port = u16::from_be_bytes([block[34], block[35]]);
                self.src = Some(PeerAddr::Inet(SocketAddr::V6(
                    SocketAddrV6::new(src_ip, src_port, 0, 0),
                )));
                self.dst = Some(PeerAddr::Inet(SocketAddr::V6(
                    SocketAddrV6::new(dst_ip, dst_port, 0, 0),
                )));
            }
            AddrFamily::Unix => {
                self.src = Some(PeerAddr::Unix(UnixPath::from_wire(
                    &block[..UNIX_PATH_LEN],
                )));
                self.dst = Some(PeerAddr::Unix(UnixPath::from_wire(
                    &block[UNIX_PATH_LEN..],
                )));
            }
        }
    }

    fn fire(&mut self, status: Proxy2Status) {
        self.calling_cb = true;
        let done = self.state == State::Done;
        let Proxy2Handler {
            cb,
            buf,
            src,
            dst,
            cmd,
            socktype,
            header_size,
            tlv_start,
            tlv_len,
            ..
        } = self;
        let (tlv_data, extra): (&[u8], &[u8]) = if done {
            (
                &buf[*tlv_start..*tlv_start + *tlv_len],
                &buf[*header_size..],
            )
        } else {
            (&[], &[])
        };
        let event = Proxy2Event {
            status,
            cmd: *cmd,
            socktype: *socktype,
            src: src.as_ref(),
            dst: dst.as_ref(),
            tlv_data,
            extra,
        };
        (cb)(&event);
        self.calling_cb = false;
    }
}

impl<'cb> std::fmt::Debug for Proxy2Handler<'cb> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy2Handler")
            .field("state", &self.state)
            .field("buffered", &self.buf.len())
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

/// Processes a complete header in one go, for datagram transports.
///
/// Anything except [`Proxy2Status::Success`] indicates failure, since
/// no more data can arrive.
pub fn handle_directly(
    data: &[u8],
    cb: impl FnMut(&Proxy2Event<'_>),
) -> Proxy2Status {
    let mut handler = Proxy2Handler::new(0, cb);
    handler.push(data)
}

//============ Tests =========================================================
