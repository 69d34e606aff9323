//! Error types for the RPC transport.

use crate::pdu::{PduType, RejectReason};
use thiserror::Error;

/// Why a bind or alter-context handshake was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindRejectCause {
    /// The server answered with a BindNack.
    Nack(RejectReason),
    /// The server acknowledged the association but rejected the presentation
    /// context element.
    Context { result: u16, reason: u16 },
}

impl std::fmt::Display for BindRejectCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindRejectCause::Nack(reason) => write!(f, "association rejected: {reason}"),
            BindRejectCause::Context { result, reason } => write!(
                f,
                "presentation context rejected: {} (result {result})",
                context_reason_str(*reason)
            ),
        }
    }
}

fn context_reason_str(reason: u16) -> &'static str {
    match reason {
        0 => "reason not specified",
        1 => "abstract syntax not supported",
        2 => "proposed transfer syntaxes not supported",
        3 => "local limit exceeded",
        _ => "unknown provider reason",
    }
}

/// Channel-level failures. The connection's usability after one of these
/// depends on the channel's own state; the call that hit it is always lost.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel closed by peer")]
    Closed,

    #[error("call id mismatch: expected {expected}, received {got}")]
    CallIdMismatch { expected: u32, got: u32 },

    #[error("unexpected {got:?} PDU while waiting for {expected}")]
    UnexpectedPdu { expected: &'static str, got: PduType },

    #[error("fragment length {frag_length} exceeds the {limit}-byte receive limit")]
    TooLarge { frag_length: usize, limit: usize },

    #[error("operation invalid in the connection's current state: {0}")]
    InvalidState(&'static str),
}

/// Transport-facing error taxonomy.
///
/// Call-fatal variants leave the connection usable for subsequent calls;
/// [`ConnectionShutdown`](RpcError::ConnectionShutdown) and a dead channel do
/// not. Nothing here is retried internally.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Header or length inconsistency in a received PDU. Fatal to the
    /// current call only.
    #[error("malformed PDU: {0}")]
    MalformedPdu(String),

    /// The server declined the interface or transfer syntax. Never retried.
    #[error("bind rejected: {0}")]
    BindRejected(BindRejectCause),

    /// The token exchange did not converge within the mechanism's leg limit.
    #[error("authentication incomplete after {legs} legs")]
    AuthenticationIncomplete { legs: usize },

    /// A second security context was requested but the server never
    /// advertised security-context multiplexing.
    #[error("server did not negotiate security context multiplexing")]
    MultiplexingNotSupported,

    /// A received auth trailer names a context id this connection does not
    /// own.
    #[error("unknown security context id {0}")]
    UnknownSecurityContext(u32),

    /// Server-reported fault, status code preserved verbatim.
    #[error("call {call_id} faulted with status {status:#010x}")]
    Fault { call_id: u32, status: u32 },

    /// The server forced termination. Every pending and future call on this
    /// connection fails.
    #[error("connection shut down by server")]
    ConnectionShutdown,

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The security provider failed during a token step or message
    /// protection.
    #[error("security provider error: {0}")]
    Security(String),
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Transport(TransportError::Io(err))
    }
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, RpcError>;
