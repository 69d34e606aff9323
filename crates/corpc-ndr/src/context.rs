//! Encoding/decoding context: byte order and alignment helpers.

use bytes::{Buf, BufMut};

/// NDR context carried through every encode/decode call.
///
/// The byte order is fixed when the transfer syntax is negotiated and never
/// changes for the lifetime of a connection.
#[derive(Debug, Clone, Copy)]
pub struct NdrContext {
    pub little_endian: bool,
}

impl NdrContext {
    /// Standard NDR context: little-endian.
    pub fn new() -> Self {
        Self {
            little_endian: true,
        }
    }

    pub fn big_endian() -> Self {
        Self {
            little_endian: false,
        }
    }

    /// Padding needed to bring `position` to an `alignment` boundary.
    #[inline]
    pub fn align_padding(position: usize, alignment: usize) -> usize {
        if alignment <= 1 {
            return 0;
        }
        let rem = position % alignment;
        if rem == 0 {
            0
        } else {
            alignment - rem
        }
    }

    /// Write zero padding up to an alignment boundary, advancing `position`.
    pub fn pad_to<B: BufMut>(&self, buf: &mut B, position: &mut usize, alignment: usize) {
        let padding = Self::align_padding(*position, alignment);
        buf.put_bytes(0, padding);
        *position += padding;
    }

    /// Skip padding up to an alignment boundary, advancing `position`.
    ///
    /// Returns the number of bytes skipped, or `None` if the buffer is short.
    pub fn skip_to<B: Buf>(&self, buf: &mut B, position: &mut usize, alignment: usize) -> Option<usize> {
        let padding = Self::align_padding(*position, alignment);
        if buf.remaining() < padding {
            return None;
        }
        buf.advance(padding);
        *position += padding;
        Some(padding)
    }

    #[inline]
    pub fn put_u16<B: BufMut>(&self, buf: &mut B, value: u16) {
        if self.little_endian {
            buf.put_u16_le(value);
        } else {
            buf.put_u16(value);
        }
    }

    #[inline]
    pub fn put_u32<B: BufMut>(&self, buf: &mut B, value: u32) {
        if self.little_endian {
            buf.put_u32_le(value);
        } else {
            buf.put_u32(value);
        }
    }

    #[inline]
    pub fn put_u64<B: BufMut>(&self, buf: &mut B, value: u64) {
        if self.little_endian {
            buf.put_u64_le(value);
        } else {
            buf.put_u64(value);
        }
    }

    #[inline]
    pub fn get_u16<B: Buf>(&self, buf: &mut B) -> u16 {
        if self.little_endian {
            buf.get_u16_le()
        } else {
            buf.get_u16()
        }
    }

    #[inline]
    pub fn get_u32<B: Buf>(&self, buf: &mut B) -> u32 {
        if self.little_endian {
            buf.get_u32_le()
        } else {
            buf.get_u32()
        }
    }

    #[inline]
    pub fn get_u64<B: Buf>(&self, buf: &mut B) -> u64 {
        if self.little_endian {
            buf.get_u64_le()
        } else {
            buf.get_u64()
        }
    }
}

impl Default for NdrContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn alignment_padding() {
        assert_eq!(NdrContext::align_padding(0, 4), 0);
        assert_eq!(NdrContext::align_padding(1, 4), 3);
        assert_eq!(NdrContext::align_padding(3, 4), 1);
        assert_eq!(NdrContext::align_padding(4, 4), 0);
        assert_eq!(NdrContext::align_padding(5, 8), 3);
        assert_eq!(NdrContext::align_padding(7, 1), 0);
    }

    #[test]
    fn byte_order_roundtrip() {
        for ctx in [NdrContext::new(), NdrContext::big_endian()] {
            let mut buf = BytesMut::new();
            ctx.put_u16(&mut buf, 0x1234);
            ctx.put_u32(&mut buf, 0xDEADBEEF);
            ctx.put_u64(&mut buf, 0x0123456789ABCDEF);

            let mut reader = buf.freeze();
            assert_eq!(ctx.get_u16(&mut reader), 0x1234);
            assert_eq!(ctx.get_u32(&mut reader), 0xDEADBEEF);
            assert_eq!(ctx.get_u64(&mut reader), 0x0123456789ABCDEF);
        }
    }
}
