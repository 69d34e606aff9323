//! Discriminated union encodings.
//!
//! A union travels as its selector value followed by the selected arm,
//! aligned to whichever of the two is stricter.

use crate::{NdrContext, NdrDecode, NdrEncode, Result};
use bytes::{Buf, BufMut};

/// A discriminated union: a selector picks which arm is on the wire.
///
/// Implementors return [`NdrError::InvalidSelector`](crate::NdrError) from
/// [`decode_arm`](Self::decode_arm) for selector values that map to no arm.
pub trait NdrUnion: Sized {
    type Selector: NdrEncode + NdrDecode + Copy + Into<i64>;

    fn selector(&self) -> Self::Selector;

    /// Alignment of the widest arm.
    fn arm_align() -> usize;

    fn encode_arm<B: BufMut>(
        &self,
        buf: &mut B,
        ctx: &NdrContext,
        position: &mut usize,
    ) -> Result<()>;

    fn decode_arm<B: Buf>(
        selector: Self::Selector,
        buf: &mut B,
        ctx: &NdrContext,
        position: &mut usize,
    ) -> Result<Self>;
}

pub fn encode_union<U: NdrUnion, B: BufMut>(
    value: &U,
    buf: &mut B,
    ctx: &NdrContext,
    position: &mut usize,
) -> Result<()> {
    let align = <U::Selector as NdrEncode>::ndr_align().max(U::arm_align());
    ctx.pad_to(buf, position, align);
    value.selector().ndr_encode(buf, ctx, position)?;
    value.encode_arm(buf, ctx, position)
}

pub fn decode_union<U: NdrUnion, B: Buf>(
    buf: &mut B,
    ctx: &NdrContext,
    position: &mut usize,
) -> Result<U> {
    let align = <U::Selector as NdrDecode>::ndr_align().max(U::arm_align());
    if ctx.skip_to(buf, position, align).is_none() {
        return Err(crate::NdrError::BufferUnderflow {
            needed: align,
            have: buf.remaining(),
        });
    }
    let selector = U::Selector::ndr_decode(buf, ctx, position)?;
    U::decode_arm(selector, buf, ctx, position)
}
