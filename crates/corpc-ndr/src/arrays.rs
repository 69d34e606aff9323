//! Array encodings.
//!
//! Array bounds travel as separately transmitted values ahead of the
//! elements. A conformant array carries its maximum count, a varying array
//! carries an offset and an actual count, and a conformant varying array
//! carries all three.

use crate::{NdrContext, NdrDecode, NdrEncode, NdrError, Result};
use bytes::{Buf, BufMut};

fn check_element_budget<B: Buf>(buf: &B, count: u32) -> Result<()> {
    // Every element occupies at least one byte, so a count larger than the
    // remaining buffer can never decode. Rejecting it here keeps a hostile
    // count from driving a huge allocation.
    if count as usize > buf.remaining() {
        return Err(NdrError::BufferUnderflow {
            needed: count as usize,
            have: buf.remaining(),
        });
    }
    Ok(())
}

fn decode_elements<T: NdrDecode, B: Buf>(
    buf: &mut B,
    ctx: &NdrContext,
    position: &mut usize,
    count: u32,
) -> Result<Vec<T>> {
    check_element_budget(buf, count)?;
    let mut elements = Vec::with_capacity(count as usize);
    for _ in 0..count {
        elements.push(T::ndr_decode(buf, ctx, position)?);
    }
    Ok(elements)
}

/// Array whose size is determined at transmission time: `[size_is(n)]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConformantArray<T>(pub Vec<T>);

impl<T: NdrEncode> NdrEncode for ConformantArray<T> {
    fn ndr_encode<B: BufMut>(
        &self,
        buf: &mut B,
        ctx: &NdrContext,
        position: &mut usize,
    ) -> Result<()> {
        ctx.pad_to(buf, position, 4);
        ctx.put_u32(buf, self.0.len() as u32);
        *position += 4;
        for element in &self.0 {
            element.ndr_encode(buf, ctx, position)?;
        }
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl<T: NdrDecode> NdrDecode for ConformantArray<T> {
    fn ndr_decode<B: Buf>(buf: &mut B, ctx: &NdrContext, position: &mut usize) -> Result<Self> {
        let max_count = u32::ndr_decode(buf, ctx, position)?;
        Ok(Self(decode_elements(buf, ctx, position, max_count)?))
    }

    fn ndr_align() -> usize {
        4
    }
}

/// Fixed-capacity array of which a window is transmitted: `[length_is(n)]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VaryingArray<T>(pub Vec<T>);

impl<T: NdrEncode> NdrEncode for VaryingArray<T> {
    fn ndr_encode<B: BufMut>(
        &self,
        buf: &mut B,
        ctx: &NdrContext,
        position: &mut usize,
    ) -> Result<()> {
        ctx.pad_to(buf, position, 4);
        ctx.put_u32(buf, 0); // offset
        ctx.put_u32(buf, self.0.len() as u32); // actual count
        *position += 8;
        for element in &self.0 {
            element.ndr_encode(buf, ctx, position)?;
        }
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl<T: NdrDecode> NdrDecode for VaryingArray<T> {
    fn ndr_decode<B: Buf>(buf: &mut B, ctx: &NdrContext, position: &mut usize) -> Result<Self> {
        let offset = u32::ndr_decode(buf, ctx, position)?;
        let actual = u32::ndr_decode(buf, ctx, position)?;
        if offset != 0 {
            return Err(NdrError::InvalidString(format!(
                "unsupported array offset {offset}"
            )));
        }
        Ok(Self(decode_elements(buf, ctx, position, actual)?))
    }

    fn ndr_align() -> usize {
        4
    }
}

/// Array with both transmission-time capacity and a transmitted window:
/// `[size_is(m), length_is(n)]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConformantVaryingArray<T>(pub Vec<T>);

impl<T: NdrEncode> NdrEncode for ConformantVaryingArray<T> {
    fn ndr_encode<B: BufMut>(
        &self,
        buf: &mut B,
        ctx: &NdrContext,
        position: &mut usize,
    ) -> Result<()> {
        ctx.pad_to(buf, position, 4);
        let count = self.0.len() as u32;
        ctx.put_u32(buf, count); // max count
        ctx.put_u32(buf, 0); // offset
        ctx.put_u32(buf, count); // actual count
        *position += 12;
        for element in &self.0 {
            element.ndr_encode(buf, ctx, position)?;
        }
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl<T: NdrDecode> NdrDecode for ConformantVaryingArray<T> {
    fn ndr_decode<B: Buf>(buf: &mut B, ctx: &NdrContext, position: &mut usize) -> Result<Self> {
        let max_count = u32::ndr_decode(buf, ctx, position)?;
        let offset = u32::ndr_decode(buf, ctx, position)?;
        let actual = u32::ndr_decode(buf, ctx, position)?;
        if offset != 0 {
            return Err(NdrError::InvalidString(format!(
                "unsupported array offset {offset}"
            )));
        }
        if actual > max_count {
            return Err(NdrError::BoundsMismatch {
                conformance: max_count,
                actual,
            });
        }
        Ok(Self(decode_elements(buf, ctx, position, actual)?))
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
    fn conformant_roundtrip() {
        let ctx = NdrContext::new();
        let arr = ConformantArray(vec![10u32, 20, 30]);

        let mut buf = BytesMut::new();
        let mut pos = 0;
        arr.ndr_encode(&mut buf, &ctx, &mut pos).unwrap();
        assert_eq!(buf.len(), 4 + 12);

        let mut reader = buf.freeze();
        let mut pos = 0;
        let decoded: ConformantArray<u32> =
            ConformantArray::ndr_decode(&mut reader, &ctx, &mut pos).unwrap();
        assert_eq!(decoded, arr);
    }

    #[test]
    fn conformant_varying_roundtrip() {
        let ctx = NdrContext::new();
        let arr = ConformantVaryingArray(vec![1u16, 2, 3, 4, 5]);

        let mut buf = BytesMut::new();
        let mut pos = 0;
        arr.ndr_encode(&mut buf, &ctx, &mut pos).unwrap();

        let mut reader = buf.freeze();
        let mut pos = 0;
        let decoded: ConformantVaryingArray<u16> =
            ConformantVaryingArray::ndr_decode(&mut reader, &ctx, &mut pos).unwrap();
        assert_eq!(decoded, arr);
    }

    #[test]
    fn varying_roundtrip() {
        let ctx = NdrContext::new();
        let arr = VaryingArray(vec![7u8, 8, 9]);

        let mut buf = BytesMut::new();
        let mut pos = 0;
        arr.ndr_encode(&mut buf, &ctx, &mut pos).unwrap();

        let mut reader = buf.freeze();
        let mut pos = 0;
        let decoded: VaryingArray<u8> =
            VaryingArray::ndr_decode(&mut reader, &ctx, &mut pos).unwrap();
        assert_eq!(decoded, arr);
    }

    #[test]
    fn hostile_count_rejected() {
        let ctx = NdrContext::new();
        let mut buf = BytesMut::new();
        ctx.put_u32(&mut buf, u32::MAX); // max count far past the buffer

        let mut reader = buf.freeze();
        let mut pos = 0;
        let err = ConformantArray::<u32>::ndr_decode(&mut reader, &ctx, &mut pos).unwrap_err();
        assert!(matches!(err, NdrError::BufferUnderflow { .. }));
    }

    #[test]
    fn window_past_capacity_rejected() {
        let ctx = NdrContext::new();
        let mut buf = BytesMut::new();
        ctx.put_u32(&mut buf, 2); // max
        ctx.put_u32(&mut buf, 0); // offset
        ctx.put_u32(&mut buf, 3); // actual > max
        buf.extend_from_slice(&[0u8; 12]);

        let mut reader = buf.freeze();
        let mut pos = 0;
        let err =
            ConformantVaryingArray::<u32>::ndr_decode(&mut reader, &ctx, &mut pos).unwrap_err();
        assert!(matches!(err, NdrError::BoundsMismatch { .. }));
    }
}
