//! Connection-oriented RPC client: bind negotiation, security context
//! establishment, and call dispatch.
//!
//! One client owns one channel and serializes one call at a time; every
//! operation takes `&mut self`, so overlapped calls on a single connection
//! are impossible by construction. Concurrency comes from opening more
//! connections.

use crate::auth::{AuthLevel, SecurityProvider, TokenTurn};
use crate::channel::PduChannel;
use crate::error::{BindRejectCause, Result, RpcError, TransportError};
use crate::fragment::{self, Reassembler};
use crate::pdu::{
    capability_syntax, Bind, BindAck, ContextElement, ContextResult, Pdu, PduBody, PduFlags,
    PduType, Request, SyntaxId, Uuid, CAP_SECURITY_CONTEXT_MULTIPLEXING, NDR_SYNTAX,
};
use crate::secctx::{SecurityContextHandle, SecurityContextTable};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

/// Presentation context id offered for the bound interface.
const PRESENTATION_CONTEXT_ID: u16 = 0;
/// Context id of the capability negotiation element on the first bind.
const CAPABILITY_CONTEXT_ID: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Unbound,
    Bound,
    Disconnected,
}

/// What the server granted at bind time. Immutable for the connection's
/// lifetime once accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindResult {
    pub max_xmit: u16,
    pub max_recv: u16,
    pub assoc_group: u32,
    pub multiplexing: bool,
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct RpcClientBuilder {
    max_xmit: u16,
    max_recv: u16,
    max_pdu: usize,
}

impl RpcClientBuilder {
    fn new() -> Self {
        Self {
            max_xmit: 5840,
            max_recv: 5840,
            max_pdu: 1 << 20,
        }
    }

    /// Fragment sizes proposed in the Bind; the server may grant less.
    pub fn proposed_frag_sizes(mut self, max_xmit: u16, max_recv: u16) -> Self {
        self.max_xmit = max_xmit;
        self.max_recv = max_recv;
        self
    }

    /// Hard ceiling on any single received PDU, independent of what the
    /// peer declares.
    pub fn max_pdu_size(mut self, max_pdu: usize) -> Self {
        self.max_pdu = max_pdu;
        self
    }

    pub fn attach<T: AsyncRead + AsyncWrite + Unpin>(self, io: T) -> RpcClient<T> {
        RpcClient {
            channel: PduChannel::new(io, self.max_pdu),
            state: ConnectionState::Unbound,
            next_call_id: 1,
            proposed_xmit: self.max_xmit,
            proposed_recv: self.max_recv,
            interface: None,
            bind_result: None,
            capability_offered: false,
            contexts: SecurityContextTable::new(),
            current_context: None,
        }
    }
}

pub struct RpcClient<T> {
    channel: PduChannel<T>,
    state: ConnectionState,
    next_call_id: u32,
    proposed_xmit: u16,
    proposed_recv: u16,
    interface: Option<SyntaxId>,
    bind_result: Option<BindResult>,
    capability_offered: bool,
    contexts: SecurityContextTable,
    current_context: Option<u32>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> RpcClient<T> {
    pub fn new(io: T) -> Self {
        Self::builder().attach(io)
    }

    pub fn builder() -> RpcClientBuilder {
        RpcClientBuilder::new()
    }

    /// Negotiated bind outcome, if bound.
    pub fn bind_result(&self) -> Option<&BindResult> {
        self.bind_result.as_ref()
    }

    pub fn max_xmit_frag(&self) -> Option<u16> {
        self.bind_result.map(|r| r.max_xmit)
    }

    pub fn max_recv_frag(&self) -> Option<u16> {
        self.bind_result.map(|r| r.max_recv)
    }

    pub fn assoc_group(&self) -> Option<u32> {
        self.bind_result.map(|r| r.assoc_group)
    }

    pub fn supports_multiplexing(&self) -> bool {
        self.bind_result.is_some_and(|r| r.multiplexing)
    }

    pub fn is_connected(&self) -> bool {
        self.state != ConnectionState::Disconnected
    }

    fn alloc_call_id(&mut self) -> u32 {
        let id = self.next_call_id;
        self.next_call_id += 1;
        id
    }

    /// Bind the connection to `interface` with no authentication.
    pub async fn bind(&mut self, interface: SyntaxId) -> Result<BindResult> {
        self.bind_inner(interface, None).await?;
        self.bind_result
            .ok_or(RpcError::Transport(TransportError::InvalidState(
                "bind completed without a result",
            )))
    }

    /// Bind with authentication: the Bind carries the provider's first
    /// token and the handshake is driven to completion before returning.
    /// The new context becomes the current one.
    pub async fn bind_secure(
        &mut self,
        interface: SyntaxId,
        provider: Box<dyn SecurityProvider>,
        level: AuthLevel,
    ) -> Result<SecurityContextHandle> {
        let handle = self.bind_inner(interface, Some((provider, level))).await?;
        handle.ok_or(RpcError::Transport(TransportError::InvalidState(
            "secure bind completed without a context",
        )))
    }

    async fn bind_inner(
        &mut self,
        interface: SyntaxId,
        security: Option<(Box<dyn SecurityProvider>, AuthLevel)>,
    ) -> Result<Option<SecurityContextHandle>> {
        match self.state {
            ConnectionState::Disconnected => return Err(RpcError::ConnectionShutdown),
            ConnectionState::Bound => {
                return Err(RpcError::Transport(TransportError::InvalidState(
                    "connection is already bound",
                )))
            }
            ConnectionState::Unbound => {}
        }
        self.interface = Some(interface);

        // First leg of the token exchange, if any, rides on the Bind.
        let mut handshake = None;
        let trailer = match security {
            None => None,
            Some((provider, level)) => {
                let id = self.contexts.allocate(provider, level);
                let ctx = self.contexts.get_mut(id)?;
                match ctx.provider.step(None)? {
                    TokenTurn::Continue(token) => {
                        handshake = Some((id, false));
                        Some(ctx.trailer(token))
                    }
                    TokenTurn::Complete { final_token } => {
                        // the mechanism's last token rides on the Bind itself
                        ctx.negotiated = true;
                        handshake = Some((id, true));
                        final_token.map(|token| ctx.trailer(token))
                    }
                }
            }
        };

        let mut elements = vec![ContextElement {
            context_id: PRESENTATION_CONTEXT_ID,
            abstract_syntax: interface,
            transfer_syntaxes: vec![NDR_SYNTAX],
        }];
        if !self.capability_offered {
            elements.push(ContextElement {
                context_id: CAPABILITY_CONTEXT_ID,
                abstract_syntax: interface,
                transfer_syntaxes: vec![capability_syntax(CAP_SECURITY_CONTEXT_MULTIPLEXING)],
            });
            self.capability_offered = true;
        }

        let call_id = self.alloc_call_id();
        let pdu = Pdu {
            flags: PduFlags::single(),
            call_id,
            body: PduBody::Bind(Bind {
                max_xmit: self.proposed_xmit,
                max_recv: self.proposed_recv,
                assoc_group: 0,
                elements,
            }),
            trailer,
        };
        debug!(call_id, interface = %interface.uuid, "sending bind");
        self.channel.send(&pdu.encode()?).await?;

        let reply = self.recv_reply(call_id).await?;
        let server_token = reply.trailer.as_ref().map(|t| t.blob.clone());
        match reply.body {
            PduBody::BindAck(ack) => {
                let result = self.accept_bind_ack(&ack, true)?;
                debug!(
                    max_xmit = result.max_xmit,
                    max_recv = result.max_recv,
                    assoc_group = result.assoc_group,
                    multiplexing = result.multiplexing,
                    "bind acknowledged"
                );
            }
            PduBody::BindNack(nack) => {
                return Err(RpcError::BindRejected(BindRejectCause::Nack(nack.reason)));
            }
            other => {
                return Err(RpcError::Transport(TransportError::UnexpectedPdu {
                    expected: "BindAck",
                    got: other.ptype(),
                }))
            }
        }
        self.state = ConnectionState::Bound;

        match handshake {
            None => Ok(None),
            Some((id, already_complete)) => {
                if !already_complete {
                    self.drive_handshake(id, server_token, 1).await?;
                }
                self.current_context = Some(id);
                Ok(Some(SecurityContextHandle(id)))
            }
        }
    }

    /// Establish an additional security context on an already-bound
    /// connection. Requires negotiated multiplexing support.
    pub async fn add_security_context(
        &mut self,
        provider: Box<dyn SecurityProvider>,
        level: AuthLevel,
    ) -> Result<SecurityContextHandle> {
        match self.state {
            ConnectionState::Disconnected => return Err(RpcError::ConnectionShutdown),
            ConnectionState::Unbound => {
                return Err(RpcError::Transport(TransportError::InvalidState(
                    "security context added before bind",
                )))
            }
            ConnectionState::Bound => {}
        }
        if !self.supports_multiplexing() {
            return Err(RpcError::MultiplexingNotSupported);
        }

        let id = self.contexts.allocate(provider, level);
        match self.contexts.get_mut(id)?.provider.step(None)? {
            TokenTurn::Complete { final_token } => {
                if let Some(token) = final_token {
                    self.send_auth3(id, token).await?;
                }
                self.contexts.get_mut(id)?.negotiated = true;
            }
            TokenTurn::Continue(token) => {
                let server_token = self.send_alter_context(id, token).await?;
                self.drive_handshake(id, server_token, 1).await?;
            }
        }
        debug!(context_id = id, "security context established");
        Ok(SecurityContextHandle(id))
    }

    /// Choose the context protecting subsequent calls.
    pub fn select_security_context(&mut self, handle: SecurityContextHandle) -> Result<()> {
        if !self.contexts.contains(handle.0) {
            return Err(RpcError::UnknownSecurityContext(handle.0));
        }
        self.current_context = Some(handle.0);
        Ok(())
    }

    /// Loop the token exchange until the provider completes or its leg
    /// budget runs out. `legs` counts exchanges already spent.
    async fn drive_handshake(
        &mut self,
        id: u32,
        mut server_token: Option<Bytes>,
        mut legs: usize,
    ) -> Result<()> {
        let max_legs = self.contexts.get_mut(id)?.provider.max_legs();
        loop {
            let turn = self
                .contexts
                .get_mut(id)?
                .provider
                .step(server_token.as_deref())?;
            match turn {
                TokenTurn::Complete { final_token } => {
                    if let Some(token) = final_token {
                        self.send_auth3(id, token).await?;
                    }
                    self.contexts.get_mut(id)?.negotiated = true;
                    debug!(context_id = id, legs, "token exchange complete");
                    return Ok(());
                }
                TokenTurn::Continue(token) => {
                    if legs >= max_legs {
                        debug!(context_id = id, legs, "token exchange abandoned");
                        return Err(RpcError::AuthenticationIncomplete { legs });
                    }
                    server_token = self.send_alter_context(id, token).await?;
                    legs += 1;
                }
            }
        }
    }

    /// One AlterContext round trip carrying a handshake token; returns the
    /// server's next token, if any.
    async fn send_alter_context(&mut self, id: u32, token: Bytes) -> Result<Option<Bytes>> {
        let interface = self
            .interface
            .ok_or(RpcError::Transport(TransportError::InvalidState(
                "alter context before bind",
            )))?;
        let trailer = self.contexts.get_mut(id)?.trailer(token);
        let call_id = self.alloc_call_id();
        let pdu = Pdu {
            flags: PduFlags::single(),
            call_id,
            body: PduBody::AlterContext(Bind {
                max_xmit: self.proposed_xmit,
                max_recv: self.proposed_recv,
                assoc_group: self.assoc_group().unwrap_or(0),
                elements: vec![ContextElement {
                    context_id: PRESENTATION_CONTEXT_ID,
                    abstract_syntax: interface,
                    transfer_syntaxes: vec![NDR_SYNTAX],
                }],
            }),
            trailer: Some(trailer),
        };
        trace!(call_id, context_id = id, "sending alter context");
        self.channel.send(&pdu.encode()?).await?;

        let reply = self.recv_reply(call_id).await?;
        let server_token = reply.trailer.as_ref().map(|t| t.blob.clone());
        match reply.body {
            PduBody::AlterContextResponse(ack) => {
                // capability results are not re-negotiated on this path
                self.accept_bind_ack(&ack, false)?;
                Ok(server_token)
            }
            PduBody::BindNack(nack) => {
                Err(RpcError::BindRejected(BindRejectCause::Nack(nack.reason)))
            }
            other => Err(RpcError::Transport(TransportError::UnexpectedPdu {
                expected: "AlterContextResponse",
                got: other.ptype(),
            })),
        }
    }

    /// Final confirmation leg: sent without expecting a reply.
    async fn send_auth3(&mut self, id: u32, token: Bytes) -> Result<()> {
        let trailer = self.contexts.get_mut(id)?.trailer(token);
        let call_id = self.alloc_call_id();
        let pdu = Pdu {
            flags: PduFlags::single(),
            call_id,
            body: PduBody::Auth3,
            trailer: Some(trailer),
        };
        trace!(call_id, context_id = id, "sending auth3");
        self.channel.send(&pdu.encode()?).await
    }

    /// Validate an acknowledgement body and, on the bind path, record the
    /// negotiated result.
    fn accept_bind_ack(&mut self, ack: &BindAck, is_bind: bool) -> Result<BindResult> {
        let first = ack.results.first().ok_or_else(|| {
            RpcError::MalformedPdu("acknowledgement carries no result entries".into())
        })?;
        if first.result != ContextResult::ACCEPTANCE {
            return Err(RpcError::BindRejected(BindRejectCause::Context {
                result: first.result,
                reason: first.reason,
            }));
        }

        // A second entry, when present, reports capability negotiation; its
        // absence leaves the flags unchanged.
        let multiplexing = match ack.results.get(1) {
            Some(entry) if entry.result == ContextResult::NEGOTIATE_ACK => {
                entry.reason & CAP_SECURITY_CONTEXT_MULTIPLEXING != 0
            }
            _ => self.bind_result.is_some_and(|r| r.multiplexing),
        };

        let result = BindResult {
            max_xmit: ack.max_xmit,
            max_recv: ack.max_recv,
            assoc_group: ack.assoc_group,
            multiplexing,
        };
        if is_bind {
            self.bind_result = Some(result);
        }
        Ok(result)
    }

    /// Dispatch one call and return the reassembled response stub.
    ///
    /// `object`, when given, is sent as the flag-gated object UUID on every
    /// request fragment. The current security context, if it protects
    /// messages, signs or seals each fragment.
    pub async fn send_receive(
        &mut self,
        opnum: u16,
        object: Option<Uuid>,
        stub: Bytes,
    ) -> Result<Bytes> {
        match self.state {
            ConnectionState::Disconnected => return Err(RpcError::ConnectionShutdown),
            ConnectionState::Unbound => {
                return Err(RpcError::Transport(TransportError::InvalidState(
                    "call dispatched before bind",
                )))
            }
            ConnectionState::Bound => {}
        }
        let max_xmit = self
            .max_xmit_frag()
            .ok_or(RpcError::Transport(TransportError::InvalidState(
                "call dispatched before bind",
            )))?;

        let (protect_id, sig_len) = match self.current_context {
            Some(id) => {
                let ctx = self.contexts.get_mut(id)?;
                if ctx.level.protects_messages() {
                    (Some(id), ctx.provider.signature_len())
                } else {
                    (None, 0)
                }
            }
            None => (None, 0),
        };

        let budget = fragment::max_stub_len(max_xmit, object.is_some(), sig_len);
        if budget == 0 && !stub.is_empty() {
            return Err(RpcError::Transport(TransportError::InvalidState(
                "negotiated fragment size leaves no room for stub data",
            )));
        }

        let call_id = self.alloc_call_id();
        let fragments = fragment::split_stub(&stub, budget);
        let total = fragments.len();
        trace!(call_id, opnum, fragments = total, "dispatching call");

        for (index, frag) in fragments.iter().enumerate() {
            let request = Request {
                alloc_hint: stub.len() as u32,
                context_id: PRESENTATION_CONTEXT_ID,
                opnum,
                object,
                stub: frag.clone(),
            };
            let stub_offset = request.stub_offset();
            let trailer = match protect_id {
                Some(id) => Some(
                    self.contexts
                        .get_mut(id)?
                        .trailer(Bytes::from(vec![0u8; sig_len])),
                ),
                None => None,
            };
            let pdu = Pdu {
                flags: fragment::fragment_flags(index, total),
                call_id,
                body: PduBody::Request(request),
                trailer,
            };
            let mut wire = pdu.encode()?;
            if let Some(id) = protect_id {
                self.contexts.protect_pdu(id, &mut wire, stub_offset)?;
            }
            trace!(call_id, fragment = index, len = wire.len(), "sending request fragment");
            self.channel.send(&wire).await?;
        }

        trace!(call_id, "call sent, awaiting response");

        let mut reassembler: Option<Reassembler> = None;
        loop {
            let (header, payload) = self.channel.recv().await?;
            if header.ptype == PduType::Shutdown {
                self.state = ConnectionState::Disconnected;
                debug!(call_id, "server forced shutdown");
                return Err(RpcError::ConnectionShutdown);
            }
            if header.call_id != call_id {
                trace!(call_id, got = header.call_id, "call aborted by interleaved reply");
                return Err(RpcError::Transport(TransportError::CallIdMismatch {
                    expected: call_id,
                    got: header.call_id,
                }));
            }

            let pdu = Pdu::decode(&header, payload)?;
            match pdu.body {
                PduBody::Fault(fault) => {
                    debug!(call_id, status = fault.status, "call faulted");
                    return Err(RpcError::Fault {
                        call_id,
                        status: fault.status,
                    });
                }
                PduBody::Response(response) => {
                    let stub = match &pdu.trailer {
                        Some(trailer) => {
                            self.contexts
                                .unseal(&header.to_bytes(), response.stub, trailer)?
                        }
                        None => response.stub,
                    };
                    let assembler = reassembler
                        .get_or_insert_with(|| Reassembler::new(response.alloc_hint as usize));
                    if assembler.push(header.flags, &stub)? {
                        debug!(call_id, "call completed");
                        if let Some(assembler) = reassembler.take() {
                            return assembler.into_payload();
                        }
                    }
                }
                other => {
                    return Err(RpcError::Transport(TransportError::UnexpectedPdu {
                        expected: "Response",
                        got: other.ptype(),
                    }))
                }
            }
        }
    }

    /// Read one reply PDU for `call_id`, classifying Shutdown and call id
    /// mismatches.
    async fn recv_reply(&mut self, call_id: u32) -> Result<Pdu> {
        let (header, payload) = self.channel.recv().await?;
        if header.ptype == PduType::Shutdown {
            self.state = ConnectionState::Disconnected;
            return Err(RpcError::ConnectionShutdown);
        }
        if header.call_id != call_id {
            return Err(RpcError::Transport(TransportError::CallIdMismatch {
                expected: call_id,
                got: header.call_id,
            }));
        }
        Pdu::decode(&header, payload)
    }
}
