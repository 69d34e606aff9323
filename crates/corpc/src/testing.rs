//! Deterministic security provider for tests and examples.
//!
//! Exercises the full token-exchange and sign/seal path without any OS
//! credential machinery: tokens are counted, sealing is an XOR stream keyed
//! by sequence number, the signature is an 8-byte checksum.

use crate::auth::{AuthType, SecurityProvider, TokenTurn};
use crate::error::{Result, RpcError};
use bytes::Bytes;

/// Scriptable provider: completes after a configured number of server
/// tokens, optionally emits a confirmation token that expects no reply, and
/// seals with an XOR stream.
pub struct XorSealProvider {
    key: u8,
    handshake_legs: usize,
    legs_seen: usize,
    final_leg: bool,
    max_legs: usize,
}

impl XorSealProvider {
    /// One server token completes the handshake; eight-leg bound.
    pub fn new(key: u8) -> Self {
        Self {
            key,
            handshake_legs: 1,
            legs_seen: 0,
            final_leg: false,
            max_legs: 8,
        }
    }

    /// Require `legs` server tokens before completing.
    pub fn with_handshake_legs(mut self, legs: usize) -> Self {
        self.handshake_legs = legs;
        self
    }

    /// Finish with a confirmation token that expects no server reply.
    pub fn with_final_leg(mut self) -> Self {
        self.final_leg = true;
        self
    }

    pub fn with_max_legs(mut self, max_legs: usize) -> Self {
        self.max_legs = max_legs;
        self
    }

    /// A handshake that never converges, for leg-limit tests.
    pub fn endless(mut self) -> Self {
        self.handshake_legs = usize::MAX;
        self
    }

    fn token(&self) -> Bytes {
        Bytes::from(format!("xor-token-{}", self.legs_seen))
    }

    fn keystream(&self, byte: u8, seq_no: u32) -> u8 {
        byte ^ self.key ^ (seq_no as u8) ^ 0x80
    }

    fn checksum(&self, header: &[u8], body: &[u8], seq_no: u32) -> [u8; 8] {
        let mut sum = u64::from(seq_no).wrapping_add(u64::from(self.key) << 32);
        for &b in header.iter().chain(body) {
            sum = sum.wrapping_mul(31).wrapping_add(u64::from(b));
        }
        sum.to_le_bytes()
    }
}

impl SecurityProvider for XorSealProvider {
    fn auth_type(&self) -> AuthType {
        AuthType::Other(0xEE)
    }

    fn step(&mut self, server_token: Option<&[u8]>) -> Result<TokenTurn> {
        if server_token.is_some() {
            self.legs_seen += 1;
        }
        if self.legs_seen >= self.handshake_legs {
            let final_token = self.final_leg.then(|| self.token());
            Ok(TokenTurn::Complete { final_token })
        } else {
            Ok(TokenTurn::Continue(self.token()))
        }
    }

    fn max_legs(&self) -> usize {
        self.max_legs
    }

    fn signature_len(&self) -> usize {
        8
    }

    fn protect(&mut self, header: &[u8], body: &[u8], seq_no: u32) -> Result<(Bytes, Bytes)> {
        let sealed: Vec<u8> = body.iter().map(|&b| self.keystream(b, seq_no)).collect();
        let blob = self.checksum(header, body, seq_no);
        Ok((Bytes::from(sealed), Bytes::copy_from_slice(&blob)))
    }

    fn unprotect(
        &mut self,
        header: &[u8],
        body: &[u8],
        blob: &[u8],
        seq_no: u32,
    ) -> Result<Bytes> {
        let plain: Vec<u8> = body.iter().map(|&b| self.keystream(b, seq_no)).collect();
        if blob != self.checksum(header, &plain, seq_no) {
            return Err(RpcError::Security(format!(
                "checksum mismatch at sequence {seq_no}"
            )));
        }
        Ok(Bytes::from(plain))
    }
}
