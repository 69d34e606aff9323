//! Outbound stub splitting and inbound response reassembly.

use crate::auth::AuthTrailer;
use crate::error::{Result, RpcError};
use crate::pdu::{PduFlags, REQUEST_STUB_OFFSET};
use bytes::{BufMut, Bytes, BytesMut};

/// Largest stub slice that fits a Request fragment of `max_xmit` bytes.
///
/// Subtracts the PDU header, the request body header, the object UUID when
/// one is sent, and, when a signature is in play, the auth trailer plus the
/// worst-case body alignment padding.
pub fn max_stub_len(max_xmit: u16, has_object: bool, signature_len: usize) -> usize {
    let mut overhead = REQUEST_STUB_OFFSET;
    if has_object {
        overhead += 16;
    }
    if signature_len > 0 {
        overhead += AuthTrailer::HEADER_LEN + signature_len + 15;
    }
    (max_xmit as usize).saturating_sub(overhead)
}

/// Split a serialized call payload into ordered fragment slices of at most
/// `max_stub` bytes each. An empty payload still yields one (empty)
/// fragment so the call produces a PDU. A zero `max_stub` is treated as
/// one byte so the split always makes progress.
pub fn split_stub(stub: &Bytes, max_stub: usize) -> Vec<Bytes> {
    if stub.is_empty() {
        return vec![Bytes::new()];
    }
    let max_stub = max_stub.max(1);
    let mut fragments = Vec::with_capacity(stub.len().div_ceil(max_stub));
    let mut offset = 0;
    while offset < stub.len() {
        let end = (offset + max_stub).min(stub.len());
        fragments.push(stub.slice(offset..end));
        offset = end;
    }
    fragments
}

/// Fragment flags for position `index` of `total` fragments.
pub fn fragment_flags(index: usize, total: usize) -> PduFlags {
    let mut flags = PduFlags::default();
    if index == 0 {
        flags = flags.with(PduFlags::FIRST_FRAG);
    }
    if index + 1 == total {
        flags = flags.with(PduFlags::LAST_FRAG);
    }
    flags
}

/// Accumulates decoded response bodies until a last fragment arrives.
///
/// Callers feed body bytes only; per-fragment auth trailers must already be
/// verified and stripped.
#[derive(Debug)]
pub struct Reassembler {
    buf: BytesMut,
    started: bool,
    complete: bool,
}

/// Ceiling on the capacity pre-reserved from a peer-declared allocation
/// hint. Larger responses still reassemble; the buffer grows as fragments
/// arrive.
const MAX_ALLOC_HINT: usize = 1 << 20;

impl Reassembler {
    /// `alloc_hint` pre-reserves the buffer from the server's declared total
    /// stub size; zero is fine. The hint is untrusted input and is clamped
    /// before any allocation.
    pub fn new(alloc_hint: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(alloc_hint.min(MAX_ALLOC_HINT)),
            started: false,
            complete: false,
        }
    }

    /// Append one fragment. Returns `true` once the last fragment has been
    /// absorbed.
    pub fn push(&mut self, flags: PduFlags, body: &[u8]) -> Result<bool> {
        if self.complete {
            return Err(RpcError::MalformedPdu(
                "fragment after the last fragment".into(),
            ));
        }
        if !self.started {
            if !flags.is_first() {
                return Err(RpcError::MalformedPdu(
                    "first fragment missing its first-fragment flag".into(),
                ));
            }
            self.started = true;
        } else if flags.is_first() {
            return Err(RpcError::MalformedPdu("duplicate first fragment".into()));
        }

        self.buf.put_slice(body);
        if flags.is_last() {
            self.complete = true;
        }
        Ok(self.complete)
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The reassembled payload; only valid once complete.
    pub fn into_payload(self) -> Result<Bytes> {
        if !self.complete {
            return Err(RpcError::MalformedPdu(
                "reassembly finished before the last fragment".into(),
            ));
        }
        Ok(self.buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_thousand_bytes_at_two_thousand_budget_is_five_fragments() {
        let stub = Bytes::from(vec![0x5A; 10_000]);
        let fragments = split_stub(&stub, 2_000);
        assert_eq!(fragments.len(), 5);
        for (i, frag) in fragments.iter().enumerate() {
            assert_eq!(frag.len(), 2_000);
            let flags = fragment_flags(i, fragments.len());
            assert_eq!(flags.is_first(), i == 0);
            assert_eq!(flags.is_last(), i == 4);
        }
    }

    #[test]
    fn split_and_reassemble_roundtrip() {
        for (len, budget) in [(1usize, 10usize), (10, 10), (11, 10), (4096, 1000), (0, 64)] {
            let stub = Bytes::from((0..len).map(|i| i as u8).collect::<Vec<_>>());
            let fragments = split_stub(&stub, budget);

            let mut reassembler = Reassembler::new(len);
            for (i, frag) in fragments.iter().enumerate() {
                reassembler
                    .push(fragment_flags(i, fragments.len()), frag)
                    .unwrap();
            }
            assert_eq!(reassembler.into_payload().unwrap(), stub);
        }
    }

    #[test]
    fn zero_budget_splits_one_byte_at_a_time() {
        let stub = Bytes::from_static(b"abc");
        let fragments = split_stub(&stub, 0);
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0], "a");
    }

    #[test]
    fn hostile_alloc_hint_does_not_reserve() {
        let reassembler = Reassembler::new(u32::MAX as usize);
        assert!(reassembler.buf.capacity() <= MAX_ALLOC_HINT);

        // data past the clamped preallocation still reassembles
        let mut reassembler = Reassembler::new(usize::MAX);
        let chunk = vec![0x42u8; 512 * 1024];
        reassembler
            .push(PduFlags(PduFlags::FIRST_FRAG), &chunk)
            .unwrap();
        reassembler.push(PduFlags::default(), &chunk).unwrap();
        reassembler
            .push(PduFlags(PduFlags::LAST_FRAG), &chunk)
            .unwrap();
        assert_eq!(reassembler.into_payload().unwrap().len(), 3 * 512 * 1024);
    }

    #[test]
    fn single_fragment_carries_both_flags() {
        let flags = fragment_flags(0, 1);
        assert!(flags.is_first());
        assert!(flags.is_last());
    }

    #[test]
    fn missing_first_flag_rejected() {
        let mut reassembler = Reassembler::new(0);
        let err = reassembler
            .push(PduFlags(PduFlags::LAST_FRAG), b"abc")
            .unwrap_err();
        assert!(matches!(err, RpcError::MalformedPdu(_)));
    }

    #[test]
    fn duplicate_first_flag_rejected() {
        let mut reassembler = Reassembler::new(0);
        reassembler
            .push(PduFlags(PduFlags::FIRST_FRAG), b"abc")
            .unwrap();
        let err = reassembler
            .push(PduFlags(PduFlags::FIRST_FRAG), b"def")
            .unwrap_err();
        assert!(matches!(err, RpcError::MalformedPdu(_)));
    }

    #[test]
    fn stub_budget_leaves_room_for_trailer() {
        // 16 header + 8 body header + 8 trailer header + 16 signature + 15
        // worst-case padding = 63 bytes of overhead
        assert_eq!(max_stub_len(2048, false, 16), 2048 - 63);
        assert_eq!(max_stub_len(2048, false, 0), 2048 - 24);
        assert_eq!(max_stub_len(2048, true, 0), 2048 - 40);
        assert_eq!(max_stub_len(10, false, 16), 0);
    }
}
