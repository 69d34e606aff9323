//! Authentication primitives: trailer layout, protection levels and the
//! pluggable token-exchange provider seam.

use crate::error::{Result, RpcError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Registered authentication service identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    Spnego,
    Ntlm,
    Kerberos,
    Netlogon,
    Other(u8),
}

impl AuthType {
    pub fn as_u8(self) -> u8 {
        match self {
            AuthType::Spnego => 9,
            AuthType::Ntlm => 10,
            AuthType::Kerberos => 16,
            AuthType::Netlogon => 68,
            AuthType::Other(v) => v,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            9 => AuthType::Spnego,
            10 => AuthType::Ntlm,
            16 => AuthType::Kerberos,
            68 => AuthType::Netlogon,
            other => AuthType::Other(other),
        }
    }
}

/// Protection applied to each message once a context is negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthLevel {
    /// No protection at all.
    None,
    /// Authenticate the connection only; no per-message protection.
    Connect,
    /// Sign every PDU.
    PacketIntegrity,
    /// Sign and seal every PDU.
    PacketPrivacy,
}

impl AuthLevel {
    pub fn as_u8(self) -> u8 {
        match self {
            AuthLevel::None => 1,
            AuthLevel::Connect => 2,
            AuthLevel::PacketIntegrity => 5,
            AuthLevel::PacketPrivacy => 6,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AuthLevel::None),
            2 => Some(AuthLevel::Connect),
            5 => Some(AuthLevel::PacketIntegrity),
            6 => Some(AuthLevel::PacketPrivacy),
            _ => None,
        }
    }

    /// True when the level calls for a per-message signature or seal.
    pub fn protects_messages(self) -> bool {
        self >= AuthLevel::PacketIntegrity
    }
}

/// Trailer appended after the (padded) PDU body when authentication is
/// active: type, level, pad length, a reserved byte, the 4-byte context id,
/// then the mechanism blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTrailer {
    pub auth_type: AuthType,
    pub level: AuthLevel,
    pub pad_len: u8,
    pub context_id: u32,
    pub blob: Bytes,
}

impl AuthTrailer {
    pub const HEADER_LEN: usize = 8;

    pub fn new(auth_type: AuthType, level: AuthLevel, context_id: u32, blob: Bytes) -> Self {
        Self {
            auth_type,
            level,
            pad_len: 0,
            context_id,
            blob,
        }
    }

    /// Bytes this trailer occupies on the wire, excluding body padding.
    pub fn wire_len(&self) -> usize {
        Self::HEADER_LEN + self.blob.len()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.auth_type.as_u8());
        buf.put_u8(self.level.as_u8());
        buf.put_u8(self.pad_len);
        buf.put_u8(0);
        buf.put_u32_le(self.context_id);
        buf.put_slice(&self.blob);
    }

    pub fn decode(mut buf: Bytes) -> Result<Self> {
        if buf.len() < Self::HEADER_LEN {
            return Err(RpcError::MalformedPdu(format!(
                "auth trailer truncated at {} bytes",
                buf.len()
            )));
        }
        let auth_type = AuthType::from_u8(buf.get_u8());
        let level_raw = buf.get_u8();
        let level = AuthLevel::from_u8(level_raw).ok_or_else(|| {
            RpcError::MalformedPdu(format!("unknown authentication level {level_raw}"))
        })?;
        let pad_len = buf.get_u8();
        let _reserved = buf.get_u8();
        let context_id = buf.get_u32_le();
        Ok(Self {
            auth_type,
            level,
            pad_len,
            context_id,
            blob: buf,
        })
    }
}

/// Padding that brings the header plus body to a 16-byte boundary before the
/// auth trailer. `body_len` excludes the 16-byte PDU header.
pub fn auth_pad_len(body_len: usize) -> usize {
    let total = crate::pdu::HEADER_LEN + body_len;
    (16 - total % 16) % 16
}

/// Outcome of one token-exchange leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenTurn {
    /// Send this token and expect another from the server.
    Continue(Bytes),
    /// The context is established. `final_token`, when present, must still
    /// be delivered to the server but no reply follows.
    Complete { final_token: Option<Bytes> },
}

/// Pluggable opaque token-exchange and message-protection mechanism.
///
/// One provider instance backs exactly one security context; the connection
/// drives `step` until it reports [`TokenTurn::Complete`], then switches to
/// the per-message `protect`/`unprotect` contract.
pub trait SecurityProvider: Send {
    fn auth_type(&self) -> AuthType;

    /// Advance the handshake. `server_token` is `None` only on the first
    /// leg.
    fn step(&mut self, server_token: Option<&[u8]>) -> Result<TokenTurn>;

    /// Upper bound on handshake legs before the exchange is abandoned.
    fn max_legs(&self) -> usize {
        8
    }

    /// Length of the signature blob produced by `protect`.
    fn signature_len(&self) -> usize;

    /// Sign (and at privacy level, seal) one outbound message. `body` is the
    /// stub data plus alignment padding; returns the protected body and the
    /// auth blob.
    fn protect(&mut self, header: &[u8], body: &[u8], seq_no: u32) -> Result<(Bytes, Bytes)>;

    /// Verify (and unseal) one inbound message, returning the original body.
    fn unprotect(
        &mut self,
        header: &[u8],
        body: &[u8],
        blob: &[u8],
        seq_no: u32,
    ) -> Result<Bytes>;
}
