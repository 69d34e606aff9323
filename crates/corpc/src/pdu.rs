//! PDU codec: the 16-byte protocol header and the per-type bodies.
//!
//! Encoding and decoding are pure transforms over byte buffers; framing I/O
//! lives in [`channel`](crate::channel). The set of PDU types is closed and
//! every codec is selected by pattern match over [`PduType`].

use crate::auth::{auth_pad_len, AuthTrailer};
use crate::error::{Result, RpcError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const HEADER_LEN: usize = 16;
pub const VERSION_MAJOR: u8 = 5;
pub const VERSION_MINOR: u8 = 0;

/// Fixed offset of the stub within a Request PDU without an object UUID.
pub const REQUEST_STUB_OFFSET: usize = HEADER_LEN + 8;

/// Capability bit: the server supports multiple security contexts on one
/// connection.
pub const CAP_SECURITY_CONTEXT_MULTIPLEXING: u16 = 0x0001;

fn need(buf: &Bytes, n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(RpcError::MalformedPdu(format!(
            "truncated {what}: need {n} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    Request,
    Response,
    Fault,
    Bind,
    BindAck,
    BindNack,
    AlterContext,
    AlterContextResponse,
    Auth3,
    Shutdown,
}

impl PduType {
    pub fn as_u8(self) -> u8 {
        match self {
            PduType::Request => 0,
            PduType::Response => 2,
            PduType::Fault => 3,
            PduType::Bind => 11,
            PduType::BindAck => 12,
            PduType::BindNack => 13,
            PduType::AlterContext => 14,
            PduType::AlterContextResponse => 15,
            PduType::Auth3 => 16,
            PduType::Shutdown => 17,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PduType::Request),
            2 => Some(PduType::Response),
            3 => Some(PduType::Fault),
            11 => Some(PduType::Bind),
            12 => Some(PduType::BindAck),
            13 => Some(PduType::BindNack),
            14 => Some(PduType::AlterContext),
            15 => Some(PduType::AlterContextResponse),
            16 => Some(PduType::Auth3),
            17 => Some(PduType::Shutdown),
            _ => None,
        }
    }
}

/// Header flags bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PduFlags(pub u8);

impl PduFlags {
    pub const LAST_FRAG: u8 = 0x01;
    pub const FIRST_FRAG: u8 = 0x02;
    pub const OBJECT_UUID: u8 = 0x80;

    /// Both fragment flags, for an unfragmented PDU.
    pub fn single() -> Self {
        Self(Self::FIRST_FRAG | Self::LAST_FRAG)
    }

    pub fn with(self, bit: u8) -> Self {
        Self(self.0 | bit)
    }

    pub fn is_first(self) -> bool {
        self.0 & Self::FIRST_FRAG != 0
    }

    pub fn is_last(self) -> bool {
        self.0 & Self::LAST_FRAG != 0
    }

    pub fn has_object(self) -> bool {
        self.0 & Self::OBJECT_UUID != 0
    }
}

/// Floating-point representation named by the data-representation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatRepr {
    Ieee,
    Vax,
    Cray,
    Ibm,
}

/// Four-byte data-representation tag carried in every header.
///
/// Byte 0 packs the integer order (high nibble, 1 = little-endian) and the
/// character set (low nibble, 1 = EBCDIC); byte 1 names the float format;
/// the last two bytes are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRepresentation {
    pub little_endian: bool,
    pub ebcdic: bool,
    pub float: FloatRepr,
}

impl DataRepresentation {
    /// The only representation this transport emits or accepts:
    /// little-endian, ASCII, IEEE.
    pub const NDR_LE: Self = Self {
        little_endian: true,
        ebcdic: false,
        float: FloatRepr::Ieee,
    };

    pub fn to_bytes(self) -> [u8; 4] {
        let byte0 = (u8::from(self.little_endian) << 4) | u8::from(self.ebcdic);
        let byte1 = match self.float {
            FloatRepr::Ieee => 0,
            FloatRepr::Vax => 1,
            FloatRepr::Cray => 2,
            FloatRepr::Ibm => 3,
        };
        [byte0, byte1, 0, 0]
    }

    pub fn from_bytes(raw: [u8; 4]) -> Result<Self> {
        let float = match raw[1] {
            0 => FloatRepr::Ieee,
            1 => FloatRepr::Vax,
            2 => FloatRepr::Cray,
            3 => FloatRepr::Ibm,
            other => {
                return Err(RpcError::MalformedPdu(format!(
                    "unknown float representation {other}"
                )))
            }
        };
        Ok(Self {
            little_endian: raw[0] >> 4 == 1,
            ebcdic: raw[0] & 0x0F == 1,
            float,
        })
    }

    pub fn is_supported(self) -> bool {
        self == Self::NDR_LE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uuid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Uuid {
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.data1);
        buf.put_u16_le(self.data2);
        buf.put_u16_le(self.data3);
        buf.put_slice(&self.data4);
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        need(buf, 16, "UUID")?;
        let data1 = buf.get_u32_le();
        let data2 = buf.get_u16_le();
        let data3 = buf.get_u16_le();
        let mut data4 = [0u8; 8];
        buf.copy_to_slice(&mut data4);
        Ok(Self {
            data1,
            data2,
            data3,
            data4,
        })
    }
}

impl std::fmt::Display for Uuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7],
        )
    }
}

/// Interface or transfer-syntax identifier: UUID plus version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntaxId {
    pub uuid: Uuid,
    pub ver_major: u16,
    pub ver_minor: u16,
}

impl SyntaxId {
    pub const fn new(uuid: Uuid, ver_major: u16, ver_minor: u16) -> Self {
        Self {
            uuid,
            ver_major,
            ver_minor,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        self.uuid.encode(buf);
        buf.put_u16_le(self.ver_major);
        buf.put_u16_le(self.ver_minor);
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        let uuid = Uuid::decode(buf)?;
        need(buf, 4, "syntax version")?;
        Ok(Self {
            uuid,
            ver_major: buf.get_u16_le(),
            ver_minor: buf.get_u16_le(),
        })
    }
}

/// The standard NDR transfer syntax, version 2.
pub const NDR_SYNTAX: SyntaxId = SyntaxId::new(
    Uuid::new(
        0x8a885d04,
        0x1ceb,
        0x11c9,
        [0x9f, 0xe8, 0x08, 0x00, 0x2b, 0x10, 0x48, 0x60],
    ),
    2,
    0,
);

/// Bind-time capability negotiation rides as an extra context element whose
/// "transfer syntax" carries this UUID prefix with the capability bitmask in
/// the two bytes that follow it.
const CAP_UUID_PREFIX: (u32, u16, u16) = (0x6cb71c2c, 0x9812, 0x4540);

pub fn capability_syntax(caps: u16) -> SyntaxId {
    let caps = caps.to_le_bytes();
    SyntaxId::new(
        Uuid::new(
            CAP_UUID_PREFIX.0,
            CAP_UUID_PREFIX.1,
            CAP_UUID_PREFIX.2,
            [caps[0], caps[1], 0, 0, 0, 0, 0, 0],
        ),
        1,
        0,
    )
}

/// Capability bits carried by a negotiation syntax, if it is one.
pub fn capability_bits(syntax: &SyntaxId) -> Option<u16> {
    let u = &syntax.uuid;
    if (u.data1, u.data2, u.data3) == CAP_UUID_PREFIX {
        Some(u16::from_le_bytes([u.data4[0], u.data4[1]]))
    } else {
        None
    }
}

/// Reject reasons carried by a BindNack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotSpecified,
    TemporaryCongestion,
    LocalLimitExceeded,
    ProtocolVersionNotSupported,
    AuthTypeNotRecognized,
    InvalidChecksum,
    Other(u16),
}

impl RejectReason {
    pub fn as_u16(self) -> u16 {
        match self {
            RejectReason::NotSpecified => 0,
            RejectReason::TemporaryCongestion => 1,
            RejectReason::LocalLimitExceeded => 2,
            RejectReason::ProtocolVersionNotSupported => 4,
            RejectReason::AuthTypeNotRecognized => 8,
            RejectReason::InvalidChecksum => 9,
            RejectReason::Other(code) => code,
        }
    }

    pub fn from_u16(code: u16) -> Self {
        match code {
            0 => RejectReason::NotSpecified,
            1 => RejectReason::TemporaryCongestion,
            2 => RejectReason::LocalLimitExceeded,
            4 => RejectReason::ProtocolVersionNotSupported,
            8 => RejectReason::AuthTypeNotRecognized,
            9 => RejectReason::InvalidChecksum,
            other => RejectReason::Other(other),
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::NotSpecified => write!(f, "reason not specified"),
            RejectReason::TemporaryCongestion => write!(f, "temporary congestion"),
            RejectReason::LocalLimitExceeded => write!(f, "local limit exceeded"),
            RejectReason::ProtocolVersionNotSupported => {
                write!(f, "protocol version not supported")
            }
            RejectReason::AuthTypeNotRecognized => write!(f, "auth type not recognized"),
            RejectReason::InvalidChecksum => write!(f, "invalid checksum"),
            RejectReason::Other(code) => write!(f, "reject reason {code}"),
        }
    }
}

/// One presentation context offer in a Bind or AlterContext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextElement {
    pub context_id: u16,
    pub abstract_syntax: SyntaxId,
    pub transfer_syntaxes: Vec<SyntaxId>,
}

impl ContextElement {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.context_id);
        buf.put_u8(self.transfer_syntaxes.len() as u8);
        buf.put_u8(0);
        self.abstract_syntax.encode(buf);
        for syntax in &self.transfer_syntaxes {
            syntax.encode(buf);
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        need(buf, 4, "context element")?;
        let context_id = buf.get_u16_le();
        let n_syntaxes = buf.get_u8();
        let _reserved = buf.get_u8();
        let abstract_syntax = SyntaxId::decode(buf)?;
        let mut transfer_syntaxes = Vec::with_capacity(n_syntaxes as usize);
        for _ in 0..n_syntaxes {
            transfer_syntaxes.push(SyntaxId::decode(buf)?);
        }
        Ok(Self {
            context_id,
            abstract_syntax,
            transfer_syntaxes,
        })
    }
}

/// Per-element outcome in a BindAck result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextResult {
    pub result: u16,
    pub reason: u16,
    pub transfer_syntax: SyntaxId,
}

impl ContextResult {
    pub const ACCEPTANCE: u16 = 0;
    pub const USER_REJECTION: u16 = 1;
    pub const PROVIDER_REJECTION: u16 = 2;
    /// Capability negotiation acknowledged; `reason` carries the granted
    /// bits.
    pub const NEGOTIATE_ACK: u16 = 3;
}

/// Bind and AlterContext share one body layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    pub max_xmit: u16,
    pub max_recv: u16,
    pub assoc_group: u32,
    pub elements: Vec<ContextElement>,
}

impl Bind {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.max_xmit);
        buf.put_u16_le(self.max_recv);
        buf.put_u32_le(self.assoc_group);
        buf.put_u8(self.elements.len() as u8);
        buf.put_u8(0);
        buf.put_u16_le(0);
        for element in &self.elements {
            element.encode(buf);
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        need(buf, 12, "bind body")?;
        let max_xmit = buf.get_u16_le();
        let max_recv = buf.get_u16_le();
        let assoc_group = buf.get_u32_le();
        let n_elements = buf.get_u8();
        buf.advance(3);
        let mut elements = Vec::with_capacity(n_elements as usize);
        for _ in 0..n_elements {
            elements.push(ContextElement::decode(buf)?);
        }
        Ok(Self {
            max_xmit,
            max_recv,
            assoc_group,
            elements,
        })
    }
}

/// BindAck and AlterContextResponse share one body layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAck {
    pub max_xmit: u16,
    pub max_recv: u16,
    pub assoc_group: u32,
    pub sec_addr: String,
    pub results: Vec<ContextResult>,
}

impl BindAck {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.max_xmit);
        buf.put_u16_le(self.max_recv);
        buf.put_u32_le(self.assoc_group);

        let addr = self.sec_addr.as_bytes();
        buf.put_u16_le(addr.len() as u16 + 1);
        buf.put_slice(addr);
        buf.put_u8(0);

        // result list aligns to 4 relative to the body start
        let pos = 10 + addr.len() + 1;
        buf.put_bytes(0, (4 - pos % 4) % 4);

        buf.put_u8(self.results.len() as u8);
        buf.put_u8(0);
        buf.put_u16_le(0);
        for result in &self.results {
            buf.put_u16_le(result.result);
            buf.put_u16_le(result.reason);
            result.transfer_syntax.encode(buf);
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        need(buf, 10, "bind ack body")?;
        let max_xmit = buf.get_u16_le();
        let max_recv = buf.get_u16_le();
        let assoc_group = buf.get_u32_le();

        let addr_len = buf.get_u16_le() as usize;
        need(buf, addr_len, "secondary address")?;
        let mut addr = vec![0u8; addr_len];
        buf.copy_to_slice(&mut addr);
        if addr.last() == Some(&0) {
            addr.pop();
        }
        let sec_addr = String::from_utf8(addr)
            .map_err(|_| RpcError::MalformedPdu("secondary address is not UTF-8".into()))?;

        let pos = 10 + addr_len;
        let pad = (4 - pos % 4) % 4;
        need(buf, pad + 4, "result list")?;
        buf.advance(pad);
        let n_results = buf.get_u8();
        buf.advance(3);

        let mut results = Vec::with_capacity(n_results as usize);
        for _ in 0..n_results {
            need(buf, 4, "result entry")?;
            let result = buf.get_u16_le();
            let reason = buf.get_u16_le();
            let transfer_syntax = SyntaxId::decode(buf)?;
            results.push(ContextResult {
                result,
                reason,
                transfer_syntax,
            });
        }
        Ok(Self {
            max_xmit,
            max_recv,
            assoc_group,
            sec_addr,
            results,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindNack {
    pub reason: RejectReason,
    pub versions: Vec<(u8, u8)>,
}

impl BindNack {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.reason.as_u16());
        buf.put_u8(self.versions.len() as u8);
        for (major, minor) in &self.versions {
            buf.put_u8(*major);
            buf.put_u8(*minor);
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        need(buf, 3, "bind nack body")?;
        let reason = RejectReason::from_u16(buf.get_u16_le());
        let n_versions = buf.get_u8();
        need(buf, n_versions as usize * 2, "version list")?;
        let mut versions = Vec::with_capacity(n_versions as usize);
        for _ in 0..n_versions {
            versions.push((buf.get_u8(), buf.get_u8()));
        }
        Ok(Self { reason, versions })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Total stub size across all fragments of this call.
    pub alloc_hint: u32,
    pub context_id: u16,
    pub opnum: u16,
    pub object: Option<Uuid>,
    pub stub: Bytes,
}

impl Request {
    /// Byte offset of the stub within the encoded PDU.
    pub fn stub_offset(&self) -> usize {
        REQUEST_STUB_OFFSET + if self.object.is_some() { 16 } else { 0 }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.alloc_hint);
        buf.put_u16_le(self.context_id);
        buf.put_u16_le(self.opnum);
        if let Some(object) = &self.object {
            object.encode(buf);
        }
        buf.put_slice(&self.stub);
    }

    fn decode(buf: &mut Bytes, flags: PduFlags) -> Result<Self> {
        need(buf, 8, "request body")?;
        let alloc_hint = buf.get_u32_le();
        let context_id = buf.get_u16_le();
        let opnum = buf.get_u16_le();
        let object = if flags.has_object() {
            Some(Uuid::decode(buf)?)
        } else {
            None
        };
        let stub = buf.copy_to_bytes(buf.remaining());
        Ok(Self {
            alloc_hint,
            context_id,
            opnum,
            object,
            stub,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub alloc_hint: u32,
    pub context_id: u16,
    pub cancel_count: u8,
    pub stub: Bytes,
}

impl Response {
    /// Byte offset of the stub within the encoded PDU.
    pub const STUB_OFFSET: usize = HEADER_LEN + 8;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.alloc_hint);
        buf.put_u16_le(self.context_id);
        buf.put_u8(self.cancel_count);
        buf.put_u8(0);
        buf.put_slice(&self.stub);
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        need(buf, 8, "response body")?;
        let alloc_hint = buf.get_u32_le();
        let context_id = buf.get_u16_le();
        let cancel_count = buf.get_u8();
        let _reserved = buf.get_u8();
        let stub = buf.copy_to_bytes(buf.remaining());
        Ok(Self {
            alloc_hint,
            context_id,
            cancel_count,
            stub,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub alloc_hint: u32,
    pub context_id: u16,
    pub cancel_count: u8,
    pub status: u32,
}

impl Fault {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.alloc_hint);
        buf.put_u16_le(self.context_id);
        buf.put_u8(self.cancel_count);
        buf.put_u8(0);
        buf.put_u32_le(self.status);
        buf.put_u32_le(0);
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        need(buf, 12, "fault body")?;
        let alloc_hint = buf.get_u32_le();
        let context_id = buf.get_u16_le();
        let cancel_count = buf.get_u8();
        let _reserved = buf.get_u8();
        let status = buf.get_u32_le();
        Ok(Self {
            alloc_hint,
            context_id,
            cancel_count,
            status,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PduBody {
    Bind(Bind),
    BindAck(BindAck),
    BindNack(BindNack),
    AlterContext(Bind),
    AlterContextResponse(BindAck),
    Request(Request),
    Response(Response),
    Fault(Fault),
    Auth3,
    Shutdown,
}

impl PduBody {
    pub fn ptype(&self) -> PduType {
        match self {
            PduBody::Bind(_) => PduType::Bind,
            PduBody::BindAck(_) => PduType::BindAck,
            PduBody::BindNack(_) => PduType::BindNack,
            PduBody::AlterContext(_) => PduType::AlterContext,
            PduBody::AlterContextResponse(_) => PduType::AlterContextResponse,
            PduBody::Request(_) => PduType::Request,
            PduBody::Response(_) => PduType::Response,
            PduBody::Fault(_) => PduType::Fault,
            PduBody::Auth3 => PduType::Auth3,
            PduBody::Shutdown => PduType::Shutdown,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            PduBody::Bind(b) | PduBody::AlterContext(b) => b.encode(buf),
            PduBody::BindAck(b) | PduBody::AlterContextResponse(b) => b.encode(buf),
            PduBody::BindNack(b) => b.encode(buf),
            PduBody::Request(b) => b.encode(buf),
            PduBody::Response(b) => b.encode(buf),
            PduBody::Fault(b) => b.encode(buf),
            // legacy pad field
            PduBody::Auth3 => buf.put_u32_le(0),
            PduBody::Shutdown => {}
        }
    }

    fn decode(ptype: PduType, flags: PduFlags, mut buf: Bytes) -> Result<Self> {
        Ok(match ptype {
            PduType::Bind => PduBody::Bind(Bind::decode(&mut buf)?),
            PduType::BindAck => PduBody::BindAck(BindAck::decode(&mut buf)?),
            PduType::BindNack => PduBody::BindNack(BindNack::decode(&mut buf)?),
            PduType::AlterContext => PduBody::AlterContext(Bind::decode(&mut buf)?),
            PduType::AlterContextResponse => {
                PduBody::AlterContextResponse(BindAck::decode(&mut buf)?)
            }
            PduType::Request => PduBody::Request(Request::decode(&mut buf, flags)?),
            PduType::Response => PduBody::Response(Response::decode(&mut buf)?),
            PduType::Fault => PduBody::Fault(Fault::decode(&mut buf)?),
            PduType::Auth3 => PduBody::Auth3,
            PduType::Shutdown => PduBody::Shutdown,
        })
    }
}

/// Decoded fixed-size header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduHeader {
    pub ptype: PduType,
    pub flags: PduFlags,
    pub drep: DataRepresentation,
    pub frag_length: u16,
    pub auth_length: u16,
    pub call_id: u32,
}

impl PduHeader {
    pub fn decode(raw: &[u8; HEADER_LEN]) -> Result<Self> {
        if raw[0] != VERSION_MAJOR || raw[1] != VERSION_MINOR {
            return Err(RpcError::MalformedPdu(format!(
                "unsupported protocol version {}.{}",
                raw[0], raw[1]
            )));
        }
        let ptype = PduType::from_u8(raw[2])
            .ok_or_else(|| RpcError::MalformedPdu(format!("unknown PDU type {}", raw[2])))?;
        let drep = DataRepresentation::from_bytes([raw[4], raw[5], raw[6], raw[7]])?;
        if !drep.is_supported() {
            return Err(RpcError::MalformedPdu(format!(
                "unsupported data representation {:02x?}",
                &raw[4..8]
            )));
        }
        let frag_length = u16::from_le_bytes([raw[8], raw[9]]);
        if (frag_length as usize) < HEADER_LEN {
            return Err(RpcError::MalformedPdu(format!(
                "fragment length {frag_length} shorter than the header"
            )));
        }
        Ok(Self {
            ptype,
            flags: PduFlags(raw[3]),
            drep,
            frag_length,
            auth_length: u16::from_le_bytes([raw[10], raw[11]]),
            call_id: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
        })
    }

    /// Re-encode the header exactly as received; used as the integrity
    /// header input for message protection.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let drep = self.drep.to_bytes();
        let frag = self.frag_length.to_le_bytes();
        let auth = self.auth_length.to_le_bytes();
        let call = self.call_id.to_le_bytes();
        [
            VERSION_MAJOR,
            VERSION_MINOR,
            self.ptype.as_u8(),
            self.flags.0,
            drep[0],
            drep[1],
            drep[2],
            drep[3],
            frag[0],
            frag[1],
            auth[0],
            auth[1],
            call[0],
            call[1],
            call[2],
            call[3],
        ]
    }
}

/// One complete PDU ready for encode, or the result of a decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub flags: PduFlags,
    pub call_id: u32,
    pub body: PduBody,
    pub trailer: Option<AuthTrailer>,
}

impl Pdu {
    /// Encode into a complete wire fragment. When a trailer is present the
    /// body is zero-padded to a 16-byte boundary first (never for Auth3);
    /// the trailer's `pad_len` is overwritten with the padding actually
    /// emitted.
    pub fn encode(&self) -> Result<BytesMut> {
        let ptype = self.body.ptype();
        let mut flags = self.flags;
        if let PduBody::Request(req) = &self.body {
            if req.object.is_some() {
                flags = flags.with(PduFlags::OBJECT_UUID);
            }
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + 64);
        buf.put_u8(VERSION_MAJOR);
        buf.put_u8(VERSION_MINOR);
        buf.put_u8(ptype.as_u8());
        buf.put_u8(flags.0);
        buf.put_slice(&DataRepresentation::NDR_LE.to_bytes());
        let auth_length = self.trailer.as_ref().map_or(0, |t| t.blob.len());
        if auth_length > u16::MAX as usize {
            return Err(RpcError::MalformedPdu(format!(
                "auth blob of {auth_length} bytes overflows the auth length field"
            )));
        }
        buf.put_u16_le(0); // frag length, patched below
        buf.put_u16_le(auth_length as u16);
        buf.put_u32_le(self.call_id);

        self.body.encode(&mut buf);

        if let Some(trailer) = &self.trailer {
            let pad = if ptype == PduType::Auth3 {
                0
            } else {
                auth_pad_len(buf.len() - HEADER_LEN)
            };
            buf.put_bytes(0, pad);
            let mut trailer = trailer.clone();
            trailer.pad_len = pad as u8;
            trailer.encode(&mut buf);
        }

        let frag_length = buf.len();
        if frag_length > u16::MAX as usize {
            return Err(RpcError::MalformedPdu(format!(
                "encoded PDU of {frag_length} bytes overflows the fragment length field"
            )));
        }
        buf[8..10].copy_from_slice(&(frag_length as u16).to_le_bytes());
        Ok(buf)
    }

    /// Decode the payload that followed a header. Stub-carrying bodies keep
    /// any trailing auth padding; the security layer strips it after
    /// verification using the trailer's `pad_len`.
    pub fn decode(header: &PduHeader, mut payload: Bytes) -> Result<Self> {
        if payload.len() + HEADER_LEN != header.frag_length as usize {
            return Err(RpcError::MalformedPdu(format!(
                "fragment length {} disagrees with {} bytes on the wire",
                header.frag_length,
                payload.len() + HEADER_LEN
            )));
        }

        let trailer = if header.auth_length > 0 {
            let total = AuthTrailer::HEADER_LEN + header.auth_length as usize;
            if total > payload.len() {
                return Err(RpcError::MalformedPdu(format!(
                    "auth trailer of {total} bytes does not fit in a {}-byte body",
                    payload.len()
                )));
            }
            let raw = payload.split_off(payload.len() - total);
            let trailer = AuthTrailer::decode(raw)?;
            if trailer.pad_len as usize > payload.len() {
                return Err(RpcError::MalformedPdu(format!(
                    "auth padding of {} bytes exceeds the body",
                    trailer.pad_len
                )));
            }
            Some(trailer)
        } else {
            None
        };

        let body = PduBody::decode(header.ptype, header.flags, payload)?;
        Ok(Self {
            flags: header.flags,
            call_id: header.call_id,
            body,
            trailer,
        })
    }
}
