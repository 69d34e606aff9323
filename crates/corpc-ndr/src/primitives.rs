//! Primitive type encodings.
//!
//! | IDL type       | Rust type | Size | Alignment |
//! |----------------|-----------|------|-----------|
//! | byte/char      | u8        | 1    | 1         |
//! | small          | i8        | 1    | 1         |
//! | short          | i16       | 2    | 2         |
//! | long           | i32       | 4    | 4         |
//! | hyper          | i64       | 8    | 8         |
//! | unsigned short | u16       | 2    | 2         |
//! | unsigned long  | u32       | 4    | 4         |
//! | unsigned hyper | u64       | 8    | 8         |
//! | float          | f32       | 4    | 4         |
//! | double         | f64       | 8    | 8         |
//! | boolean        | bool      | 1    | 1         |

use crate::{NdrContext, NdrDecode, NdrEncode, NdrError, Result};
use bytes::{Buf, BufMut};

macro_rules! impl_ndr_primitive {
    ($ty:ty, $size:expr, $align:expr, |$ectx:ident, $ebuf:ident, $v:ident| $put:expr, |$dctx:ident, $dbuf:ident| $get:expr) => {
        impl NdrEncode for $ty {
            fn ndr_encode<B: BufMut>(
                &self,
                buf: &mut B,
                ctx: &NdrContext,
                position: &mut usize,
            ) -> Result<()> {
                ctx.pad_to(buf, position, $align);
                let $ectx = ctx;
                let $ebuf = buf;
                let $v = *self;
                $put;
                *position += $size;
                Ok(())
            }

            fn ndr_align() -> usize {
                $align
            }
        }

        impl NdrDecode for $ty {
            fn ndr_decode<B: Buf>(
                buf: &mut B,
                ctx: &NdrContext,
                position: &mut usize,
            ) -> Result<Self> {
                let padding = NdrContext::align_padding(*position, $align);
                if buf.remaining() < padding + $size {
                    return Err(NdrError::BufferUnderflow {
                        needed: padding + $size,
                        have: buf.remaining(),
                    });
                }
                buf.advance(padding);
                *position += padding + $size;
                let $dctx = ctx;
                let $dbuf = buf;
                Ok($get)
            }

            fn ndr_align() -> usize {
                $align
            }
        }
    };
}

impl_ndr_primitive!(u8, 1, 1, |_c, b, v| b.put_u8(v), |_c, b| b.get_u8());
impl_ndr_primitive!(i8, 1, 1, |_c, b, v| b.put_i8(v), |_c, b| b.get_i8());
impl_ndr_primitive!(u16, 2, 2, |c, b, v| c.put_u16(b, v), |c, b| c.get_u16(b));
impl_ndr_primitive!(i16, 2, 2, |c, b, v| c.put_u16(b, v as u16), |c, b| c
    .get_u16(b) as i16);
impl_ndr_primitive!(u32, 4, 4, |c, b, v| c.put_u32(b, v), |c, b| c.get_u32(b));
impl_ndr_primitive!(i32, 4, 4, |c, b, v| c.put_u32(b, v as u32), |c, b| c
    .get_u32(b) as i32);
impl_ndr_primitive!(u64, 8, 8, |c, b, v| c.put_u64(b, v), |c, b| c.get_u64(b));
impl_ndr_primitive!(i64, 8, 8, |c, b, v| c.put_u64(b, v as u64), |c, b| c
    .get_u64(b) as i64);
impl_ndr_primitive!(f32, 4, 4, |c, b, v| c.put_u32(b, v.to_bits()), |c, b| {
    f32::from_bits(c.get_u32(b))
});
impl_ndr_primitive!(f64, 8, 8, |c, b, v| c.put_u64(b, v.to_bits()), |c, b| {
    f64::from_bits(c.get_u64(b))
});

/// Boolean: single byte, zero is false.
impl NdrEncode for bool {
    fn ndr_encode<B: BufMut>(
        &self,
        buf: &mut B,
        _ctx: &NdrContext,
        position: &mut usize,
    ) -> Result<()> {
        buf.put_u8(u8::from(*self));
        *position += 1;
        Ok(())
    }

    fn ndr_align() -> usize {
        1
    }
}

impl NdrDecode for bool {
    fn ndr_decode<B: Buf>(buf: &mut B, _ctx: &NdrContext, position: &mut usize) -> Result<Self> {
        if buf.remaining() < 1 {
            return Err(NdrError::BufferUnderflow {
                needed: 1,
                have: 0,
            });
        }
        *position += 1;
        Ok(buf.get_u8() != 0)
    }

    fn ndr_align() -> usize {
        1
    }
}

/// UUID in NDR layout: three integer fields then eight raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NdrUuid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl NdrEncode for NdrUuid {
    fn ndr_encode<B: BufMut>(
        &self,
        buf: &mut B,
        ctx: &NdrContext,
        position: &mut usize,
    ) -> Result<()> {
        ctx.pad_to(buf, position, 4);
        ctx.put_u32(buf, self.data1);
        ctx.put_u16(buf, self.data2);
        ctx.put_u16(buf, self.data3);
        buf.put_slice(&self.data4);
        *position += 16;
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for NdrUuid {
    fn ndr_decode<B: Buf>(buf: &mut B, ctx: &NdrContext, position: &mut usize) -> Result<Self> {
        let padding = NdrContext::align_padding(*position, 4);
        if buf.remaining() < padding + 16 {
            return Err(NdrError::BufferUnderflow {
                needed: padding + 16,
                have: buf.remaining(),
            });
        }
        buf.advance(padding);
        *position += padding + 16;

        let data1 = ctx.get_u32(buf);
        let data2 = ctx.get_u16(buf);
        let data3 = ctx.get_u16(buf);
        let mut data4 = [0u8; 8];
        buf.copy_to_slice(&mut data4);
        Ok(Self {
            data1,
            data2,
            data3,
            data4,
        })
    }

    fn ndr_align() -> usize {
        4
    }
}
