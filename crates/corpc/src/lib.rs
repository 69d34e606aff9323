//! Connection-oriented RPC client transport.
//!
//! Turns a logical remote procedure call into a correctly framed, optionally
//! authenticated and encrypted byte stream over any duplex channel, and
//! reassembles server responses into call results. The pieces, leaf first:
//!
//! - [`pdu`]: the fixed header and per-type body codecs.
//! - [`fragment`]: outbound stub splitting and inbound reassembly.
//! - [`channel`]: frame-delimited PDU I/O over `AsyncRead + AsyncWrite`.
//! - [`auth`] and the security context table: pluggable token exchange and
//!   per-message signing/sealing.
//! - [`client`]: bind negotiation, the multi-leg authentication loop, and
//!   the one-call-at-a-time dispatcher.
//!
//! Marshaled call payloads follow the NDR rules in the re-exported
//! [`ndr`] crate.
//!
//! ```no_run
//! use corpc::{RpcClient, SyntaxId, Uuid};
//! # async fn run(socket: tokio::net::TcpStream) -> corpc::Result<()> {
//! let interface = SyntaxId::new(
//!     Uuid::new(0x11111111, 0x2222, 0x3333, [0x44, 0x44, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55]),
//!     1,
//!     0,
//! );
//! let mut client = RpcClient::new(socket);
//! client.bind(interface).await?;
//! let reply = client.send_receive(0, None, bytes::Bytes::new()).await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod channel;
pub mod client;
pub mod error;
pub mod fragment;
pub mod pdu;
mod secctx;
pub mod testing;

pub use auth::{AuthLevel, AuthTrailer, AuthType, SecurityProvider, TokenTurn};
pub use client::{BindResult, RpcClient, RpcClientBuilder};
pub use error::{BindRejectCause, Result, RpcError, TransportError};
pub use pdu::{SyntaxId, Uuid, NDR_SYNTAX};
pub use secctx::SecurityContextHandle;

pub use corpc_ndr as ndr;
