//! Security context ownership and per-message protection.
//!
//! Contexts live in a table owned solely by the connection; callers hold
//! opaque handles, never references, so a disposed connection cannot leave a
//! live context behind.

use crate::auth::{AuthLevel, AuthTrailer, SecurityProvider};
use crate::error::{Result, RpcError};
use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use tracing::trace;

/// Opaque handle to one security context on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityContextHandle(pub(crate) u32);

impl SecurityContextHandle {
    /// The wire context id this handle names.
    pub fn context_id(self) -> u32 {
        self.0
    }
}

pub(crate) struct SecurityContext {
    pub id: u32,
    pub level: AuthLevel,
    pub provider: Box<dyn SecurityProvider>,
    pub negotiated: bool,
    send_seq: u32,
    recv_seq: u32,
}

impl SecurityContext {
    pub fn trailer(&self, blob: Bytes) -> AuthTrailer {
        AuthTrailer::new(self.provider.auth_type(), self.level, self.id, blob)
    }

    fn next_send_seq(&mut self) -> u32 {
        let seq = self.send_seq;
        self.send_seq += 1;
        seq
    }

    fn next_recv_seq(&mut self) -> u32 {
        let seq = self.recv_seq;
        self.recv_seq += 1;
        seq
    }
}

/// All contexts on one connection, keyed by context id.
pub(crate) struct SecurityContextTable {
    contexts: BTreeMap<u32, SecurityContext>,
    next_id: u32,
}

impl SecurityContextTable {
    pub fn new() -> Self {
        Self {
            contexts: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Create a context in the not-yet-negotiated state and return its id.
    /// Ids are assigned monotonically and never reused.
    pub fn allocate(&mut self, provider: Box<dyn SecurityProvider>, level: AuthLevel) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.contexts.insert(
            id,
            SecurityContext {
                id,
                level,
                provider,
                negotiated: false,
                send_seq: 0,
                recv_seq: 0,
            },
        );
        id
    }

    pub fn get_mut(&mut self, id: u32) -> Result<&mut SecurityContext> {
        self.contexts
            .get_mut(&id)
            .ok_or(RpcError::UnknownSecurityContext(id))
    }

    pub fn contains(&self, id: u32) -> bool {
        self.contexts.contains_key(&id)
    }

    /// Sign (and at privacy level, seal) an encoded Request in place.
    ///
    /// `wire` is a complete encoded PDU whose trailer blob is a placeholder
    /// of the provider's signature length; the protected region runs from
    /// `stub_offset` to the start of the trailer.
    pub fn protect_pdu(&mut self, id: u32, wire: &mut BytesMut, stub_offset: usize) -> Result<()> {
        let ctx = self.get_mut(id)?;
        let sig_len = ctx.provider.signature_len();
        let trailer_total = AuthTrailer::HEADER_LEN + sig_len;
        let region_end = wire.len() - trailer_total;
        let seq = ctx.next_send_seq();

        let (protected, blob) = ctx.provider.protect(
            &wire[..crate::pdu::HEADER_LEN],
            &wire[stub_offset..region_end],
            seq,
        )?;
        if protected.len() != region_end - stub_offset || blob.len() != sig_len {
            return Err(RpcError::Security(format!(
                "provider changed message sizes: body {} -> {}, blob {} vs {}",
                region_end - stub_offset,
                protected.len(),
                blob.len(),
                sig_len
            )));
        }
        trace!(
            context_id = id,
            seq,
            region = region_end - stub_offset,
            "protected outbound fragment"
        );

        wire[stub_offset..region_end].copy_from_slice(&protected);
        let blob_offset = wire.len() - sig_len;
        wire[blob_offset..].copy_from_slice(&blob);
        Ok(())
    }

    /// Verify one inbound fragment and return its stub with the auth
    /// padding stripped.
    ///
    /// The trailer's own context id selects the verifying context, which
    /// lets a multiplexed server answer under any negotiated context;
    /// an id this connection never allocated is an error.
    pub fn unseal(
        &mut self,
        header_bytes: &[u8],
        stub_and_pad: Bytes,
        trailer: &AuthTrailer,
    ) -> Result<Bytes> {
        let ctx = self.get_mut(trailer.context_id)?;

        let body = if ctx.level.protects_messages() {
            let seq = ctx.next_recv_seq();
            let body = ctx
                .provider
                .unprotect(header_bytes, &stub_and_pad, &trailer.blob, seq)?;
            if body.len() != stub_and_pad.len() {
                return Err(RpcError::Security(format!(
                    "provider changed message size: {} -> {}",
                    stub_and_pad.len(),
                    body.len()
                )));
            }
            trace!(
                context_id = trailer.context_id,
                seq,
                "verified inbound fragment"
            );
            body
        } else {
            stub_and_pad
        };

        let pad = trailer.pad_len as usize;
        if pad > body.len() {
            return Err(RpcError::MalformedPdu(format!(
                "auth padding of {pad} bytes exceeds the {}-byte body",
                body.len()
            )));
        }
        Ok(body.slice(..body.len() - pad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::XorSealProvider;

    fn table_with_context(level: AuthLevel) -> (SecurityContextTable, u32) {
        let mut table = SecurityContextTable::new();
        let id = table.allocate(Box::new(XorSealProvider::new(0xA5)), level);
        (table, id)
    }

    #[test]
    fn context_ids_are_monotonic() {
        let mut table = SecurityContextTable::new();
        let a = table.allocate(Box::new(XorSealProvider::new(1)), AuthLevel::Connect);
        let b = table.allocate(Box::new(XorSealProvider::new(2)), AuthLevel::Connect);
        assert!(b > a);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn unknown_context_id_rejected() {
        let (mut table, _) = table_with_context(AuthLevel::PacketPrivacy);
        assert!(matches!(
            table.get_mut(999),
            Err(RpcError::UnknownSecurityContext(999))
        ));
    }

    #[test]
    fn seal_changes_bytes_and_roundtrips() {
        let (mut table, id) = table_with_context(AuthLevel::PacketPrivacy);
        let header = [0u8; 16];
        let plain = Bytes::from_static(b"attack at dawn!!");

        let ctx = table.get_mut(id).unwrap();
        let seq = ctx.next_send_seq();
        let (sealed, blob) = ctx.provider.protect(&header, &plain, seq).unwrap();
        assert_ne!(sealed, plain);

        let trailer = AuthTrailer {
            pad_len: 0,
            ..table.get_mut(id).unwrap().trailer(blob)
        };
        let recovered = table.unseal(&header, sealed, &trailer).unwrap();
        assert_eq!(recovered, plain);
    }

    #[test]
    fn sequence_numbers_advance_per_direction() {
        let (mut table, id) = table_with_context(AuthLevel::PacketPrivacy);
        let ctx = table.get_mut(id).unwrap();
        assert_eq!(ctx.next_send_seq(), 0);
        assert_eq!(ctx.next_send_seq(), 1);
        assert_eq!(ctx.next_recv_seq(), 0);
        assert_eq!(ctx.next_recv_seq(), 1);
    }

    #[test]
    fn tampered_blob_fails_verification() {
        let (mut table, id) = table_with_context(AuthLevel::PacketPrivacy);
        let header = [0u8; 16];
        let plain = Bytes::from_static(b"payload");

        let ctx = table.get_mut(id).unwrap();
        let seq = ctx.next_send_seq();
        let (sealed, blob) = ctx.provider.protect(&header, &plain, seq).unwrap();

        let mut bad = blob.to_vec();
        bad[0] ^= 0xFF;
        let trailer = AuthTrailer {
            pad_len: 0,
            ..table.get_mut(id).unwrap().trailer(Bytes::from(bad))
        };
        assert!(matches!(
            table.unseal(&header, sealed, &trailer),
            Err(RpcError::Security(_))
        ));
    }
}
