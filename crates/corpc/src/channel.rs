//! Framed PDU transport over any duplex byte channel.
//!
//! The fragment length field in the fixed header delimits frames; one recv
//! yields exactly one PDU's header and payload. The channel is the only
//! component that touches the underlying I/O object.

use crate::error::{Result, RpcError, TransportError};
use crate::pdu::{PduHeader, HEADER_LEN};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

fn map_read_err(err: std::io::Error) -> RpcError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        RpcError::Transport(TransportError::Closed)
    } else {
        RpcError::Transport(TransportError::Io(err))
    }
}

pub struct PduChannel<T> {
    io: T,
    max_pdu: usize,
}

impl<T: AsyncRead + AsyncWrite + Unpin> PduChannel<T> {
    /// `max_pdu` bounds the fragment length this side will accept; a peer
    /// declaring more is refused before any allocation.
    pub fn new(io: T, max_pdu: usize) -> Self {
        Self { io, max_pdu }
    }

    pub async fn send(&mut self, wire: &[u8]) -> Result<()> {
        trace!(len = wire.len(), "writing PDU");
        self.io.write_all(wire).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Read exactly one PDU: the fixed header, then `frag_length - 16`
    /// payload bytes. End-of-stream surfaces as
    /// [`TransportError::Closed`].
    pub async fn recv(&mut self) -> Result<(PduHeader, Bytes)> {
        let mut raw = [0u8; HEADER_LEN];
        self.io.read_exact(&mut raw).await.map_err(map_read_err)?;
        let header = PduHeader::decode(&raw)?;

        let frag_length = header.frag_length as usize;
        if frag_length > self.max_pdu {
            return Err(RpcError::Transport(TransportError::TooLarge {
                frag_length,
                limit: self.max_pdu,
            }));
        }

        let mut payload = BytesMut::zeroed(frag_length - HEADER_LEN);
        self.io
            .read_exact(&mut payload)
            .await
            .map_err(map_read_err)?;
        trace!(ptype = ?header.ptype, call_id = header.call_id, frag_length, "read PDU");
        Ok((header, payload.freeze()))
    }
}
