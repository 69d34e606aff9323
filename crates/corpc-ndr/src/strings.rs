//! String encodings.
//!
//! Strings are conformant varying arrays of characters with a trailing null:
//! maximum count, offset and actual count travel ahead of the characters as
//! separately transmitted bounds.

use crate::{NdrContext, NdrDecode, NdrEncode, NdrError, Result};
use bytes::{Buf, BufMut};

/// Narrow (single-byte character) string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NdrString(pub String);

impl NdrString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl NdrEncode for NdrString {
    fn ndr_encode<B: BufMut>(
        &self,
        buf: &mut B,
        ctx: &NdrContext,
        position: &mut usize,
    ) -> Result<()> {
        let chars = self.0.as_bytes();
        let count = chars.len() as u32 + 1; // terminator included

        ctx.pad_to(buf, position, 4);
        ctx.put_u32(buf, count); // max count (conformance)
        ctx.put_u32(buf, 0); // offset
        ctx.put_u32(buf, count); // actual count (variance)
        buf.put_slice(chars);
        buf.put_u8(0);
        *position += 12 + count as usize;
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for NdrString {
    fn ndr_decode<B: Buf>(buf: &mut B, ctx: &NdrContext, position: &mut usize) -> Result<Self> {
        let max_count = u32::ndr_decode(buf, ctx, position)?;
        let offset = u32::ndr_decode(buf, ctx, position)?;
        let actual = u32::ndr_decode(buf, ctx, position)?;

        if offset != 0 {
            return Err(NdrError::InvalidString(format!(
                "unsupported string offset {offset}"
            )));
        }
        if actual > max_count {
            return Err(NdrError::BoundsMismatch {
                conformance: max_count,
                actual,
            });
        }
        if buf.remaining() < actual as usize {
            return Err(NdrError::BufferUnderflow {
                needed: actual as usize,
                have: buf.remaining(),
            });
        }

        let mut raw = vec![0u8; actual as usize];
        buf.copy_to_slice(&mut raw);
        *position += actual as usize;

        if raw.pop() != Some(0) {
            return Err(NdrError::InvalidString("missing null terminator".into()));
        }
        Ok(Self(String::from_utf8(raw)?))
    }

    fn ndr_align() -> usize {
        4
    }
}

/// Wide (UTF-16 character) string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NdrWString(pub String);

impl NdrWString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl NdrEncode for NdrWString {
    fn ndr_encode<B: BufMut>(
        &self,
        buf: &mut B,
        ctx: &NdrContext,
        position: &mut usize,
    ) -> Result<()> {
        let units: Vec<u16> = self.0.encode_utf16().collect();
        let count = units.len() as u32 + 1;

        ctx.pad_to(buf, position, 4);
        ctx.put_u32(buf, count);
        ctx.put_u32(buf, 0);
        ctx.put_u32(buf, count);
        for unit in units {
            ctx.put_u16(buf, unit);
        }
        ctx.put_u16(buf, 0);
        *position += 12 + 2 * count as usize;
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for NdrWString {
    fn ndr_decode<B: Buf>(buf: &mut B, ctx: &NdrContext, position: &mut usize) -> Result<Self> {
        let max_count = u32::ndr_decode(buf, ctx, position)?;
        let offset = u32::ndr_decode(buf, ctx, position)?;
        let actual = u32::ndr_decode(buf, ctx, position)?;

        if offset != 0 {
            return Err(NdrError::InvalidString(format!(
                "unsupported string offset {offset}"
            )));
        }
        if actual > max_count {
            return Err(NdrError::BoundsMismatch {
                conformance: max_count,
                actual,
            });
        }
        let byte_len = actual as usize * 2;
        if buf.remaining() < byte_len {
            return Err(NdrError::BufferUnderflow {
                needed: byte_len,
                have: buf.remaining(),
            });
        }

        let mut units = Vec::with_capacity(actual as usize);
        for _ in 0..actual {
            units.push(ctx.get_u16(buf));
        }
        *position += byte_len;

        if units.pop() != Some(0) {
            return Err(NdrError::InvalidString("missing null terminator".into()));
        }
        let decoded = char::decode_utf16(units)
            .collect::<std::result::Result<String, _>>()
            .map_err(|_| NdrError::Utf16Error)?;
        Ok(Self(decoded))
    }

    fn ndr_align() -> usize {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn narrow_string_roundtrip() {
        let ctx = NdrContext::new();
        let s = NdrString::new("ncacn_ip_tcp");

        let mut buf = BytesMut::new();
        let mut pos = 0;
        s.ndr_encode(&mut buf, &ctx, &mut pos).unwrap();

        // 12 bytes of bounds + 12 chars + terminator
        assert_eq!(buf.len(), 25);

        let mut reader = buf.freeze();
        let mut pos = 0;
        let decoded = NdrString::ndr_decode(&mut reader, &ctx, &mut pos).unwrap();
        assert_eq!(decoded.as_str(), "ncacn_ip_tcp");
    }

    #[test]
    fn wide_string_roundtrip() {
        let ctx = NdrContext::new();
        let s = NdrWString::new("pipe\\winreg");

        let mut buf = BytesMut::new();
        let mut pos = 0;
        s.ndr_encode(&mut buf, &ctx, &mut pos).unwrap();

        let mut reader = buf.freeze();
        let mut pos = 0;
        let decoded = NdrWString::ndr_decode(&mut reader, &ctx, &mut pos).unwrap();
        assert_eq!(decoded.as_str(), "pipe\\winreg");
    }

    #[test]
    fn empty_string_roundtrip() {
        let ctx = NdrContext::new();
        let mut buf = BytesMut::new();
        let mut pos = 0;
        NdrString::default()
            .ndr_encode(&mut buf, &ctx, &mut pos)
            .unwrap();

        let mut reader = buf.freeze();
        let mut pos = 0;
        let decoded = NdrString::ndr_decode(&mut reader, &ctx, &mut pos).unwrap();
        assert_eq!(decoded.as_str(), "");
    }

    #[test]
    fn actual_count_over_conformance_rejected() {
        let ctx = NdrContext::new();
        let mut buf = BytesMut::new();
        ctx.put_u32(&mut buf, 1); // max
        ctx.put_u32(&mut buf, 0); // offset
        ctx.put_u32(&mut buf, 5); // actual > max
        buf.put_slice(b"abcd\0");

        let mut reader = buf.freeze();
        let mut pos = 0;
        let err = NdrString::ndr_decode(&mut reader, &ctx, &mut pos).unwrap_err();
        assert!(matches!(err, NdrError::BoundsMismatch { .. }));
    }
}
