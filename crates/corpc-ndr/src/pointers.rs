//! Pointer encodings.
//!
//! A unique or full pointer travels as a 4-byte referent identifier in the
//! flat part of its enclosing structure; the pointed-to data is deferred and
//! emitted after the flat part, in breadth-first order. A null pointer is
//! referent id zero and defers nothing.

use crate::{NdrContext, NdrDecode, NdrEncode, NdrError, Result};
use bytes::{Buf, BytesMut};
use std::collections::VecDeque;

/// First referent id handed out by a [`ReferentWriter`].
pub const INITIAL_REFERENT_ID: u32 = 0x0002_0000;

type DeferredEncode = Box<dyn FnOnce(&mut ReferentWriter<'_>) -> Result<()>>;

/// Stub writer that tracks referent ids and deferred pointee encodes.
///
/// Callers encode the flat part of a value through [`write`](Self::write) and
/// [`write_pointer`](Self::write_pointer), then call [`flush`](Self::flush)
/// once to emit every deferred pointee. Pointees that themselves contain
/// pointers re-enter the queue, which is drained front to back, giving the
/// breadth-first layout the wire format requires.
pub struct ReferentWriter<'a> {
    buf: &'a mut BytesMut,
    ctx: NdrContext,
    position: usize,
    next_id: u32,
    deferred: VecDeque<DeferredEncode>,
}

impl<'a> ReferentWriter<'a> {
    pub fn new(buf: &'a mut BytesMut, ctx: NdrContext) -> Self {
        Self {
            buf,
            ctx,
            position: 0,
            next_id: INITIAL_REFERENT_ID,
            deferred: VecDeque::new(),
        }
    }

    /// Byte offset from the start of the stub.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Encode a value inline at the current position.
    pub fn write<T: NdrEncode>(&mut self, value: &T) -> Result<()> {
        value.ndr_encode(self.buf, &self.ctx, &mut self.position)
    }

    /// Encode a pointer: the referent id now, the pointee on flush.
    pub fn write_pointer<T>(&mut self, value: Option<&T>) -> Result<()>
    where
        T: NdrEncode + Clone + 'static,
    {
        self.ctx.pad_to(self.buf, &mut self.position, 4);
        match value {
            None => {
                self.ctx.put_u32(self.buf, 0);
                self.position += 4;
            }
            Some(value) => {
                let id = self.next_id;
                self.next_id = self.next_id.wrapping_add(4);
                self.ctx.put_u32(self.buf, id);
                self.position += 4;

                let pointee = value.clone();
                self.deferred
                    .push_back(Box::new(move |w| w.write(&pointee)));
            }
        }
        Ok(())
    }

    /// Emit every deferred pointee in breadth-first order.
    pub fn flush(&mut self) -> Result<()> {
        while let Some(job) = self.deferred.pop_front() {
            job(self)?;
        }
        Ok(())
    }
}

/// Stub reader mirroring [`ReferentWriter`].
///
/// After the flat part has been read, call
/// [`read_deferred`](Self::read_deferred) once per non-null pointer, in the
/// order the pointers were encountered.
pub struct ReferentReader<'a, B: Buf> {
    buf: &'a mut B,
    ctx: NdrContext,
    position: usize,
    pending: VecDeque<u32>,
}

impl<'a, B: Buf> ReferentReader<'a, B> {
    pub fn new(buf: &'a mut B, ctx: NdrContext) -> Self {
        Self {
            buf,
            ctx,
            position: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Non-null pointers seen but not yet resolved.
    pub fn pending_referents(&self) -> usize {
        self.pending.len()
    }

    /// Decode a value inline at the current position.
    pub fn read<T: NdrDecode>(&mut self) -> Result<T> {
        T::ndr_decode(self.buf, &self.ctx, &mut self.position)
    }

    /// Read a referent id. `None` means a null pointer.
    pub fn read_pointer(&mut self) -> Result<Option<u32>> {
        let id: u32 = self.read()?;
        if id == 0 {
            return Ok(None);
        }
        self.pending.push_back(id);
        Ok(Some(id))
    }

    /// Decode the next deferred pointee.
    pub fn read_deferred<T: NdrDecode>(&mut self) -> Result<T> {
        match self.pending.pop_front() {
            Some(_id) => self.read(),
            None => Err(NdrError::InvalidPointer(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NdrString;

    #[test]
    fn null_pointer_is_zero_and_defers_nothing() {
        let ctx = NdrContext::new();
        let mut buf = BytesMut::new();
        let mut writer = ReferentWriter::new(&mut buf, ctx);
        writer.write_pointer::<u32>(None).unwrap();
        writer.flush().unwrap();

        assert_eq!(&buf[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn pointee_deferred_after_flat_part() {
        let ctx = NdrContext::new();
        let mut buf = BytesMut::new();
        let mut writer = ReferentWriter::new(&mut buf, ctx);

        writer.write_pointer(Some(&0xAABBCCDDu32)).unwrap();
        writer.write(&7u32).unwrap();
        writer.flush().unwrap();

        // referent id, then the flat u32, then the deferred pointee
        assert_eq!(buf.len(), 12);
        assert_eq!(&buf[0..4], &INITIAL_REFERENT_ID.to_le_bytes());
        assert_eq!(&buf[4..8], &7u32.to_le_bytes());
        assert_eq!(&buf[8..12], &0xAABBCCDDu32.to_le_bytes());
    }

    #[test]
    fn two_pointers_emit_breadth_first() {
        let ctx = NdrContext::new();
        let mut buf = BytesMut::new();
        let mut writer = ReferentWriter::new(&mut buf, ctx);

        writer.write_pointer(Some(&1u32)).unwrap();
        writer.write_pointer(Some(&2u32)).unwrap();
        writer.flush().unwrap();

        // both referent ids precede both pointees, in declaration order
        assert_eq!(&buf[8..12], &1u32.to_le_bytes());
        assert_eq!(&buf[12..16], &2u32.to_le_bytes());
    }

    #[test]
    fn reader_resolves_in_order() {
        let ctx = NdrContext::new();
        let mut buf = BytesMut::new();
        let mut writer = ReferentWriter::new(&mut buf, ctx);
        writer.write_pointer(Some(&NdrString::new("hello"))).unwrap();
        writer.write_pointer::<u32>(None).unwrap();
        writer.write_pointer(Some(&42u32)).unwrap();
        writer.flush().unwrap();

        let mut bytes = buf.freeze();
        let mut reader = ReferentReader::new(&mut bytes, ctx);
        assert!(reader.read_pointer().unwrap().is_some());
        assert!(reader.read_pointer().unwrap().is_none());
        assert!(reader.read_pointer().unwrap().is_some());
        assert_eq!(reader.pending_referents(), 2);

        let s: NdrString = reader.read_deferred().unwrap();
        assert_eq!(s.as_str(), "hello");
        let n: u32 = reader.read_deferred().unwrap();
        assert_eq!(n, 42);
    }

    #[test]
    fn deferred_read_without_pointer_fails() {
        let ctx = NdrContext::new();
        let mut bytes = bytes::Bytes::from_static(&[0u8; 4]);
        let mut reader = ReferentReader::new(&mut bytes, ctx);
        assert!(reader.read_deferred::<u32>().is_err());
    }
}
