//! NDR (Network Data Representation) wire format runtime.
//!
//! NDR is the transfer syntax used for structured call payloads riding inside
//! RPC Request/Response PDUs. The rules implemented here are independent of
//! any specific procedure and are fixed for the lifetime of a connection:
//!
//! - Primitives align to their natural size (1, 2, 4 or 8 bytes) and are
//!   emitted in the negotiated byte order.
//! - Strings are conformant varying arrays with a null terminator.
//! - Array bounds travel as separately transmitted conformance/variance
//!   values, never inline with the elements.
//! - Pointers are 4-byte referent identifiers; pointed-to data is emitted
//!   deferred, in breadth-first order.
//! - Discriminated unions encode a selector value followed by the selected
//!   arm.

mod arrays;
mod context;
mod error;
mod pointers;
mod primitives;
mod strings;
mod unions;

pub use arrays::{ConformantArray, ConformantVaryingArray, VaryingArray};
pub use context::NdrContext;
pub use error::{NdrError, Result};
pub use pointers::{ReferentReader, ReferentWriter, INITIAL_REFERENT_ID};
pub use primitives::NdrUuid;
pub use strings::{NdrString, NdrWString};
pub use unions::{decode_union, encode_union, NdrUnion};

use bytes::{Buf, BufMut};

/// Types that can be written in NDR wire format.
///
/// `position` is the byte offset from the start of the stub, used to compute
/// alignment padding; callers thread it through every encode call.
pub trait NdrEncode {
    fn ndr_encode<B: BufMut>(
        &self,
        buf: &mut B,
        ctx: &NdrContext,
        position: &mut usize,
    ) -> Result<()>;

    /// Natural alignment of this type.
    fn ndr_align() -> usize
    where
        Self: Sized;
}

/// Types that can be read from NDR wire format.
pub trait NdrDecode: Sized {
    fn ndr_decode<B: Buf>(buf: &mut B, ctx: &NdrContext, position: &mut usize) -> Result<Self>;

    fn ndr_align() -> usize;
}
