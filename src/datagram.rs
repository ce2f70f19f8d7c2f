//! DTLS over a non-blocking datagram transport.

use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::certificate::PeerCertificate;
use crate::context::Context;
use crate::engine::{Channel, Engine, EngineError, Role, Session, TransportKind};
use crate::error::{CloseReason, Error};
use crate::event::{DatagramEvent, Delivery};
use crate::loss::LossTracker;
use crate::net::{DatagramTransport, LinkState};
use crate::reactor::{Interest, Reactor, TimerId, Token};
use crate::record;
use crate::session::{Call, ErrorClass, HandshakeRole, Wrapped};
use crate::shim::Shim;
use crate::timer::TimerSlot;

/// Lifecycle of a [`DtlsSocket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtlsState {
    /// Server on an unconnected transport, waiting for a ClientHello with a
    /// valid cookie.
    ListenNeeded,
    Connecting(HandshakeRole),
    Connected,
    Closed,
}

/// A DTLS session over a datagram transport.
///
/// Inbound datagrams are handed in by the owner through
/// [`handle_datagram`](DtlsSocket::handle_datagram), one at a time. The
/// socket arms reactor timers for the engine's retransmissions and for the
/// overall handshake timeout.
///
/// The transport is shared. A listening socket and the peer sockets it
/// produced all refer to the same bound port.
pub struct DtlsSocket<S: Session> {
    wrapped: Wrapped<S, DatagramEvent>,
    state: DtlsState,
    shim: Shim,
    loss: LossTracker,
    retransmit_timer: TimerSlot,
    handshake_timer: TimerSlot,
    handshake_timeout: Duration,
    chunk: usize,
    send_blocked: bool,
}

impl<S: Session> DtlsSocket<S> {
    /// Create a socket over `transport`.
    ///
    /// A connected or connecting transport starts the handshake in the
    /// context's role. An unconnected transport is only accepted for a
    /// server, which then starts with the stateless listen.
    pub fn new<E: Engine<Session = S>>(
        ctx: &Context<E>,
        transport: Rc<dyn DatagramTransport>,
        token: Token,
        reactor: &mut dyn Reactor,
    ) -> Result<Self, Error> {
        let state = match transport.state() {
            LinkState::Connected | LinkState::Connecting => {
                DtlsState::Connecting(ctx.role().into())
            }
            LinkState::Unconnected if ctx.role() == Role::Server => DtlsState::ListenNeeded,
            _ => return Err(Error::Unconnected),
        };

        let config = ctx.config();
        let shim = Shim::new(
            transport,
            config.link_mtu(),
            ctx.cookie_secret().cloned(),
        );

        let mut session = ctx.new_session(TransportKind::Datagram)?;
        if let Some(mtu) = shim.mtu() {
            session.set_mtu(mtu);
        }

        let mut socket = DtlsSocket {
            wrapped: Wrapped::new(session, token),
            state,
            shim,
            loss: LossTracker::new(),
            retransmit_timer: TimerSlot::new(),
            handshake_timer: TimerSlot::new(),
            handshake_timeout: config.handshake_timeout(),
            chunk: config.read_chunk_size(),
            send_blocked: false,
        };

        if let DtlsState::Connecting(_) = state {
            // The first writable event sends the first flight.
            socket.wrapped.register(reactor, Interest::BOTH);
            let at = reactor.now() + socket.handshake_timeout;
            socket.handshake_timer.arm(reactor, token, at);
        } else {
            socket.wrapped.register(reactor, Interest::READ);
        }

        Ok(socket)
    }

    pub fn token(&self) -> Token {
        self.wrapped.token()
    }

    pub fn state(&self) -> DtlsState {
        self.state
    }

    /// Records received while connected.
    pub fn packets_received(&self) -> u64 {
        self.loss.received()
    }

    /// Records presumed lost while connected.
    pub fn packets_lost(&self) -> u64 {
        self.loss.lost()
    }

    /// Largest record payload assumed to fit the link.
    pub fn mtu(&self) -> Option<usize> {
        self.shim.mtu()
    }

    /// The peer this socket talks to. `None` while listening.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shim.transport().and_then(|t| t.peer_addr())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shim.transport().and_then(|t| t.local_addr().ok())
    }

    /// The retransmission deadline the socket's timer is armed for.
    pub fn retransmit_deadline(&self) -> Option<Instant> {
        self.retransmit_timer.deadline()
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.wrapped.close_reason()
    }

    /// Next event for the owner.
    pub fn poll_event(&mut self) -> Option<DatagramEvent> {
        self.wrapped.poll_event()
    }

    /// The peer's certificate, once the engine has one.
    pub fn peer_certificate(&self) -> Result<Option<PeerCertificate>, Error> {
        self.wrapped
            .session()
            .and_then(|s| s.peer_certificate())
            .map(|der| PeerCertificate::from_der(&der))
            .transpose()
    }

    /// One datagram arrived from `from`.
    pub fn handle_datagram(&mut self, data: &[u8], from: SocketAddr, reactor: &mut dyn Reactor) {
        let header = record::inspect(data);

        match self.state {
            DtlsState::Closed => {
                trace!("Drop {} bytes from {} on closed socket", data.len(), from);
            }
            DtlsState::ListenNeeded | DtlsState::Connecting(_) => {
                if !header.is_some_and(|h| h.content_type.is_handshake_phase()) {
                    self.unexpected(data, from, reactor);
                    return;
                }

                self.shim.stage(data, from);

                if self.state == DtlsState::ListenNeeded {
                    self.listen(reactor);
                } else {
                    self.drive_handshake(reactor);
                }
            }
            DtlsState::Connected => {
                let Some(header) = header else {
                    self.unexpected(data, from, reactor);
                    return;
                };

                self.loss
                    .observe(header.epoch, header.wire_sequence());
                self.shim.stage(data, from);
                self.read_record(reactor);

                if self.wrapped.write_wants_read && self.state == DtlsState::Connected {
                    // The blocked send can be retried now.
                    self.wrapped.write_wants_read = false;
                    if self.send_blocked {
                        self.send_blocked = false;
                        self.wrapped
                            .push(DatagramEvent::ReadyToSend, Delivery::Immediate, reactor);
                    }
                }
            }
        }
    }

    /// The transport became writable.
    pub fn handle_writable(&mut self, reactor: &mut dyn Reactor) {
        match self.state {
            DtlsState::Connecting(_) => self.drive_handshake(reactor),
            DtlsState::Connected => {
                if self.wrapped.read_wants_write {
                    // Nothing staged, the engine resumes the interrupted read.
                    self.wrapped.read_wants_write = false;
                    self.read_record(reactor);
                    if self.wrapped.read_wants_write || self.state != DtlsState::Connected {
                        return;
                    }
                }

                self.wrapped.disable_write(reactor);
                if self.send_blocked {
                    self.send_blocked = false;
                    self.wrapped
                        .push(DatagramEvent::ReadyToSend, Delivery::Immediate, reactor);
                }
            }
            DtlsState::ListenNeeded => self.wrapped.disable_write(reactor),
            DtlsState::Closed => {}
        }
    }

    /// A timer armed by this socket fired.
    pub fn handle_timer(&mut self, id: TimerId, reactor: &mut dyn Reactor) {
        if self.retransmit_timer.fired(id) {
            self.retransmit(reactor);
        } else if self.handshake_timer.fired(id) {
            if let DtlsState::Connecting(_) = self.state {
                warn!("Handshake timed out after {:?}", self.handshake_timeout);
                self.fail(CloseReason::HandshakeTimeout, Delivery::Immediate, reactor);
            }
        }
    }

    /// End-of-turn dispatch for this socket's token.
    pub fn handle_deferred(&mut self, _reactor: &mut dyn Reactor) {
        self.wrapped.promote();
    }

    /// The framework reports the transport failed.
    pub fn handle_transport_error(&mut self, err: io::Error, reactor: &mut dyn Reactor) {
        if self.state == DtlsState::Closed {
            return;
        }
        self.fail(
            CloseReason::Transport(err.to_string()),
            Delivery::Immediate,
            reactor,
        );
    }

    /// Encrypt and send one datagram worth of plaintext.
    ///
    /// `Ok(0)` means the transport is full. Retry after
    /// [`DatagramEvent::ReadyToSend`]. A failure inside `send` is returned as
    /// [`Error::Closed`] while the `Closed` event is deferred to the
    /// end-of-turn dispatch.
    pub fn send(&mut self, buf: &[u8], reactor: &mut dyn Reactor) -> Result<usize, Error> {
        if self.state != DtlsState::Connected {
            return Err(Error::NotConnected);
        }

        let Some(session) = self.wrapped.session_mut() else {
            return Err(Error::NotConnected);
        };

        match session.write(&mut self.shim, buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                let class = self
                    .wrapped
                    .classify(Call::Write, e, false, Delivery::Deferred, reactor);

                if class.is_terminal() {
                    let reason = self
                        .wrapped
                        .close_reason()
                        .cloned()
                        .unwrap_or_else(|| CloseReason::Unclassified("send failed".into()));
                    self.teardown(reactor);
                    return Err(Error::Closed(reason));
                }

                // Wanting read is resolved by the next datagram, wanting
                // write by the next writable dispatch.
                self.send_blocked = true;
                if class == ErrorClass::RetryOnWrite {
                    self.wrapped.enable_write(reactor);
                }
                Ok(0)
            }
        }
    }

    /// Bytes the engine would put on the wire to send `n` bytes of
    /// plaintext.
    ///
    /// Nothing is transmitted.
    pub fn test_overhead(&mut self, n: usize) -> Result<usize, Error> {
        if self.state != DtlsState::Connected {
            return Err(Error::NotConnected);
        }

        let Some(session) = self.wrapped.session_mut() else {
            return Err(Error::NotConnected);
        };

        let payload = vec![0u8; n];

        self.shim.begin_test_write();
        let result = session.write(&mut self.shim, &payload);
        let written = self.shim.end_test_write();
        session.clear_errors();

        result?;
        Ok(written)
    }

    /// Close the socket.
    ///
    /// Sends close-notify when connected, on a best-effort basis, then
    /// stops all timers and releases the session and the transport. No
    /// event is delivered.
    pub fn close(&mut self, reactor: &mut dyn Reactor) {
        if self.state == DtlsState::Connected {
            if let Some(session) = self.wrapped.session_mut() {
                if let Err(e) = session.shutdown(&mut self.shim) {
                    trace!("Shutdown on close: {}", e);
                }
                session.clear_errors();
            }
        }

        self.teardown(reactor);
    }

    fn listen(&mut self, reactor: &mut dyn Reactor) {
        let Some(session) = self.wrapped.session_mut() else {
            return;
        };

        let result = session.listen(&mut self.shim);
        self.shim.clear_staged();

        match result {
            Ok(peer) => self.accept_peer(peer, reactor),
            Err(EngineError::WantRead) => {
                // The common case: no cookie yet, a HelloVerifyRequest went out.
                debug!("Listen waiting for a cookie");
                session.clear_errors();
            }
            Err(e) => {
                let class = self
                    .wrapped
                    .classify(Call::Listen, e, true, Delivery::Immediate, reactor);
                if class.is_terminal() {
                    self.teardown(reactor);
                }
            }
        }
    }

    fn accept_peer(&mut self, peer: SocketAddr, reactor: &mut dyn Reactor) {
        let bound = match self.shim.transport() {
            Some(t) => t.bind_peer(peer),
            None => return,
        };

        match bound {
            Ok(transport) => {
                self.shim.rebind(transport);
                if let (Some(session), Some(mtu)) = (self.wrapped.session_mut(), self.shim.mtu()) {
                    session.set_mtu(mtu);
                }
                debug!("Listen accepted {}", peer);
                self.state = DtlsState::Connected;
                self.wrapped
                    .push(DatagramEvent::ListenSucceeded(peer), Delivery::Immediate, reactor);
            }
            Err(e) => {
                warn!("Failed to bind transport for {}: {}", peer, e);
                self.fail(
                    CloseReason::Transport(e.to_string()),
                    Delivery::Immediate,
                    reactor,
                );
            }
        }
    }

    fn drive_handshake(&mut self, reactor: &mut dyn Reactor) {
        let Some(session) = self.wrapped.session_mut() else {
            return;
        };

        let result = session.handshake(&mut self.shim);
        self.shim.clear_staged();

        match result {
            Ok(()) => self.handshake_done(reactor),
            Err(e) => {
                let class =
                    self.wrapped
                        .classify(Call::Handshake, e, true, Delivery::Immediate, reactor);
                if class.is_terminal() {
                    self.teardown(reactor);
                    return;
                }
            }
        }

        self.reconcile_retransmit(reactor);
    }

    fn handshake_done(&mut self, reactor: &mut dyn Reactor) {
        debug!("Handshake complete with {:?}", self.peer_addr());
        self.state = DtlsState::Connected;
        self.handshake_timer.stop(reactor);
        self.wrapped.set_interest(reactor, Interest::READ);
        self.wrapped
            .push(DatagramEvent::Connected, Delivery::Immediate, reactor);
    }

    /// Exactly one decrypt call for the staged datagram, or for a read the
    /// engine interrupted to write.
    fn read_record(&mut self, reactor: &mut dyn Reactor) {
        let Some(session) = self.wrapped.session_mut() else {
            return;
        };

        let mut buf = vec![0u8; self.chunk];
        let result = session.read(&mut self.shim, &mut buf);
        self.shim.clear_staged();

        match result {
            // Consumed a record without application data.
            Ok(0) => {}
            Ok(n) => {
                buf.truncate(n);
                self.wrapped
                    .push(DatagramEvent::DataReceived(buf), Delivery::Immediate, reactor);
            }
            Err(e) => {
                let class = self
                    .wrapped
                    .classify(Call::Read, e, false, Delivery::Deferred, reactor);
                if class.is_terminal() {
                    self.teardown(reactor);
                    return;
                }
            }
        }

        self.reconcile_retransmit(reactor);
    }

    fn retransmit(&mut self, reactor: &mut dyn Reactor) {
        let handshaking = matches!(self.state, DtlsState::Connecting(_));

        let Some(session) = self.wrapped.session_mut() else {
            return;
        };

        // The engine sets a new deadline if it wants another round.
        self.shim.set_retransmit_deadline(None);
        trace!("Retransmit timer fired");

        if let Err(e) = session.handle_timeout(&mut self.shim) {
            let class = self
                .wrapped
                .classify(Call::Timeout, e, handshaking, Delivery::Immediate, reactor);
            if class.is_terminal() {
                self.teardown(reactor);
                return;
            }
        }

        self.reconcile_retransmit(reactor);
    }

    /// Keep the reactor timer in line with the engine's deadline.
    fn reconcile_retransmit(&mut self, reactor: &mut dyn Reactor) {
        let at = self.shim.retransmit_deadline();
        self.retransmit_timer
            .reconcile(reactor, self.wrapped.token(), at);
    }

    fn unexpected(&mut self, data: &[u8], from: SocketAddr, reactor: &mut dyn Reactor) {
        debug!(
            "Unexpected datagram of {} bytes from {} in {:?}",
            data.len(),
            from,
            self.state
        );
        self.wrapped.push(
            DatagramEvent::UnexpectedData(data.to_vec()),
            Delivery::Immediate,
            reactor,
        );
    }

    fn fail(&mut self, reason: CloseReason, delivery: Delivery, reactor: &mut dyn Reactor) {
        let handshaking = matches!(
            self.state,
            DtlsState::Connecting(_) | DtlsState::ListenNeeded
        );
        self.wrapped
            .report_terminal(reason, handshaking, delivery, reactor);
        self.teardown(reactor);
    }

    /// Stop timers, then drop the session before the transport.
    fn teardown(&mut self, reactor: &mut dyn Reactor) {
        self.retransmit_timer.stop(reactor);
        self.handshake_timer.stop(reactor);
        self.wrapped.teardown(reactor);
        self.shim.detach();
        self.state = DtlsState::Closed;
        self.send_blocked = false;
    }
}
