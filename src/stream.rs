//! TLS over a non-blocking byte stream.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::buffer::ReadBuffer;
use crate::certificate::PeerCertificate;
use crate::context::Context;
use crate::engine::{Channel, Engine, Session, TransportKind};
use crate::error::{CloseReason, Error};
use crate::event::{Delivery, StreamEvent};
use crate::net::{ByteStream, PendingStream};
use crate::reactor::{Interest, Reactor, TimerId, Token};
use crate::session::{Call, HandshakeRole, Wrapped};
use crate::timer::TimerSlot;

/// Lifecycle of a [`TlsStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting(HandshakeRole),
    Connected,
    Closed,
}

/// The byte stream under a [`TlsStream`].
enum Link<T> {
    /// Connect still in progress. Only referenced until it completes.
    Pending(Box<dyn PendingStream<Stream = T>>),
    /// Exclusively owned connected stream.
    Owned(T),
    /// Released on close.
    Detached,
}

/// Feeds engine I/O straight through to the byte stream.
struct StreamChannel<'a, T>(&'a mut T);

impl<T: ByteStream> Channel for StreamChannel<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.0.peer_addr().ok()
    }
}

/// A TLS session over a non-blocking byte stream.
///
/// The reactor's readiness for [`TlsStream::token`] drives the handshake and
/// the reading of plaintext. Decrypted data collects in a single chunk
/// buffer which the owner empties with [`recv`](TlsStream::recv) or
/// [`consume`](TlsStream::consume). Events are drained with
/// [`poll_event`](TlsStream::poll_event).
pub struct TlsStream<S: Session, T: ByteStream> {
    wrapped: Wrapped<S, StreamEvent>,
    state: StreamState,
    link: Link<T>,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    read_buf: ReadBuffer,
    send_blocked: bool,
    delayed_read: bool,
    handshake_timer: TimerSlot,
    handshake_timeout: Duration,
}

impl<S: Session, T: ByteStream> TlsStream<S, T> {
    /// Wrap a connected stream whose addresses are known.
    pub fn with_addrs<E: Engine<Session = S>>(
        ctx: &Context<E>,
        stream: T,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        token: Token,
        reactor: &mut dyn Reactor,
    ) -> Result<Self, Error> {
        let mut s = Self::new(ctx, Link::Owned(stream), token)?;
        s.local_addr = Some(local_addr);
        s.peer_addr = Some(peer_addr);
        s.start(Interest::BOTH, reactor);
        Ok(s)
    }

    /// Wrap a connected stream, querying its addresses.
    pub fn from_stream<E: Engine<Session = S>>(
        ctx: &Context<E>,
        stream: T,
        token: Token,
        reactor: &mut dyn Reactor,
    ) -> Result<Self, Error> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        Self::with_addrs(ctx, stream, local_addr, peer_addr, token, reactor)
    }

    /// Wait for a connecting stream, then take it over.
    ///
    /// The handshake starts once the stream becomes writable and reports
    /// connected.
    pub fn from_pending<E: Engine<Session = S>>(
        ctx: &Context<E>,
        pending: Box<dyn PendingStream<Stream = T>>,
        token: Token,
        reactor: &mut dyn Reactor,
    ) -> Result<Self, Error> {
        let mut s = Self::new(ctx, Link::Pending(pending), token)?;
        s.start(Interest::WRITE, reactor);
        Ok(s)
    }

    fn new<E: Engine<Session = S>>(
        ctx: &Context<E>,
        link: Link<T>,
        token: Token,
    ) -> Result<Self, Error> {
        let session = ctx.new_session(TransportKind::Stream)?;
        let config = ctx.config();

        Ok(TlsStream {
            wrapped: Wrapped::new(session, token),
            state: StreamState::Connecting(ctx.role().into()),
            link,
            local_addr: None,
            peer_addr: None,
            read_buf: ReadBuffer::new(config.read_chunk_size()),
            send_blocked: false,
            delayed_read: false,
            handshake_timer: TimerSlot::new(),
            handshake_timeout: config.handshake_timeout(),
        })
    }

    fn start(&mut self, interest: Interest, reactor: &mut dyn Reactor) {
        self.wrapped.register(reactor, interest);
        let at = reactor.now() + self.handshake_timeout;
        self.handshake_timer.arm(reactor, self.wrapped.token(), at);
    }

    pub fn token(&self) -> Token {
        self.wrapped.token()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Why the socket closed, if it failed or the peer closed it.
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.wrapped.close_reason()
    }

    /// Whether a send was only partially accepted and no `ReadyToSend`
    /// has been delivered since.
    pub fn is_send_blocked(&self) -> bool {
        self.send_blocked
    }

    /// Next event for the owner.
    pub fn poll_event(&mut self) -> Option<StreamEvent> {
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

    /// The stream became readable.
    pub fn handle_readable(&mut self, reactor: &mut dyn Reactor) {
        match self.state {
            StreamState::Closed => {}
            StreamState::Connecting(_) => self.drive_handshake(reactor),
            StreamState::Connected => {
                if self.wrapped.write_wants_read {
                    // Let the engine finish the write. No user read this turn.
                    self.wrapped.write_wants_read = false;
                    self.flush(reactor);
                    return;
                }
                self.read_plaintext(reactor);
            }
        }
    }

    /// The stream became writable.
    pub fn handle_writable(&mut self, reactor: &mut dyn Reactor) {
        match self.state {
            StreamState::Closed => {}
            StreamState::Connecting(_) => self.drive_handshake(reactor),
            StreamState::Connected => {
                if self.wrapped.read_wants_write {
                    self.wrapped.read_wants_write = false;
                    self.read_plaintext(reactor);
                    return;
                }

                self.wrapped.disable_write(reactor);

                if self.send_blocked {
                    self.send_blocked = false;
                    self.wrapped
                        .push(StreamEvent::ReadyToSend, Delivery::Immediate, reactor);
                }
            }
        }
    }

    /// A timer armed by this socket fired.
    pub fn handle_timer(&mut self, id: TimerId, reactor: &mut dyn Reactor) {
        if !self.handshake_timer.fired(id) {
            return;
        }
        if let StreamState::Connecting(_) = self.state {
            warn!("Handshake timed out after {:?}", self.handshake_timeout);
            self.fail(CloseReason::HandshakeTimeout, Delivery::Immediate, reactor);
        }
    }

    /// End-of-turn dispatch for this socket's token.
    pub fn handle_deferred(&mut self, reactor: &mut dyn Reactor) {
        self.wrapped.promote();

        if std::mem::take(&mut self.delayed_read) && self.state == StreamState::Connected {
            self.read_plaintext(reactor);
        }
    }

    /// Encrypt and send plaintext.
    ///
    /// Returns how many bytes were accepted. The rest is not buffered: the
    /// caller keeps it and retries after [`StreamEvent::ReadyToSend`].
    ///
    /// A failure inside `send` is returned as [`Error::Closed`]. The
    /// matching `Closed` event is only delivered after the end-of-turn
    /// dispatch.
    pub fn send(&mut self, buf: &[u8], reactor: &mut dyn Reactor) -> Result<usize, Error> {
        if self.state != StreamState::Connected {
            return Err(Error::NotConnected);
        }

        let (Some(session), Link::Owned(stream)) = (self.wrapped.session_mut(), &mut self.link)
        else {
            return Err(Error::NotConnected);
        };

        let result = session.write(&mut StreamChannel(stream), buf);

        match result {
            Ok(n) => {
                if n < buf.len() {
                    trace!("Partial send {}/{}", n, buf.len());
                    self.send_blocked = true;
                    self.wrapped.enable_write(reactor);
                }
                Ok(n)
            }
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

                self.send_blocked = true;
                Ok(0)
            }
        }
    }

    /// Buffered plaintext.
    pub fn buffered(&self) -> &[u8] {
        self.read_buf.filled()
    }

    /// Mark `n` bytes of buffered plaintext as consumed.
    pub fn consume(&mut self, n: usize, reactor: &mut dyn Reactor) {
        if self.read_buf.consume(n) {
            self.schedule_read(reactor);
        }
    }

    /// Copy buffered plaintext into `buf`.
    pub fn recv(&mut self, buf: &mut [u8], reactor: &mut dyn Reactor) -> usize {
        let filled = self.read_buf.filled();
        let n = filled.len().min(buf.len());
        buf[..n].copy_from_slice(&filled[..n]);
        self.consume(n, reactor);
        n
    }

    /// Close the socket.
    ///
    /// Sends close-notify when connected, on a best-effort basis, then
    /// releases the session and the stream. No event is delivered.
    pub fn close(&mut self, reactor: &mut dyn Reactor) {
        if self.state == StreamState::Connected {
            if let (Some(session), Link::Owned(stream)) =
                (self.wrapped.session_mut(), &mut self.link)
            {
                if let Err(e) = session.shutdown(&mut StreamChannel(stream)) {
                    trace!("Shutdown on close: {}", e);
                }
                session.clear_errors();
            }
        }

        self.teardown(reactor);
        self.read_buf.clear();
    }

    fn drive_handshake(&mut self, reactor: &mut dyn Reactor) {
        if let Link::Pending(pending) = &mut self.link {
            match pending.take_connected() {
                Ok(None) => return,
                Ok(Some(stream)) => {
                    self.local_addr = stream.local_addr().ok();
                    self.peer_addr = stream.peer_addr().ok();
                    self.link = Link::Owned(stream);
                    self.wrapped.set_interest(reactor, Interest::BOTH);
                    debug!("Stream connected to {:?}", self.peer_addr);
                }
                Err(e) => {
                    self.fail(
                        CloseReason::Transport(e.to_string()),
                        Delivery::Immediate,
                        reactor,
                    );
                    return;
                }
            }
        }

        let (Some(session), Link::Owned(stream)) = (self.wrapped.session_mut(), &mut self.link)
        else {
            return;
        };

        let result = session.handshake(&mut StreamChannel(stream));

        match result {
            Ok(()) => self.handshake_done(reactor),
            Err(e) => {
                let class =
                    self.wrapped
                        .classify(Call::Handshake, e, true, Delivery::Immediate, reactor);
                if class.is_terminal() {
                    self.teardown(reactor);
                }
            }
        }
    }

    fn handshake_done(&mut self, reactor: &mut dyn Reactor) {
        debug!("Handshake complete with {:?}", self.peer_addr);
        self.state = StreamState::Connected;
        self.handshake_timer.stop(reactor);
        self.wrapped.set_interest(reactor, Interest::BOTH);
        self.wrapped
            .push(StreamEvent::Connected, Delivery::Immediate, reactor);
        // Application data may have arrived with the last handshake flight.
        self.schedule_read(reactor);
    }

    /// Zero length write to let the engine finish pending output.
    fn flush(&mut self, reactor: &mut dyn Reactor) {
        let (Some(session), Link::Owned(stream)) = (self.wrapped.session_mut(), &mut self.link)
        else {
            return;
        };

        let result = session.write(&mut StreamChannel(stream), &[]);

        match result {
            Ok(_) => {
                if self.send_blocked {
                    self.send_blocked = false;
                    self.wrapped
                        .push(StreamEvent::ReadyToSend, Delivery::Immediate, reactor);
                }
            }
            Err(e) => {
                let class = self
                    .wrapped
                    .classify(Call::Write, e, false, Delivery::Immediate, reactor);
                if class.is_terminal() {
                    self.teardown(reactor);
                }
            }
        }
    }

    fn read_plaintext(&mut self, reactor: &mut dyn Reactor) {
        // The owner has not consumed the last chunk yet.
        if !self.read_buf.is_empty() {
            return;
        }

        let mut received = false;
        let mut failure = None;

        while !self.read_buf.is_full() {
            let (Some(session), Link::Owned(stream)) =
                (self.wrapped.session_mut(), &mut self.link)
            else {
                return;
            };

            let result = session.read(&mut StreamChannel(stream), self.read_buf.spare_mut());

            match result {
                Ok(0) => break,
                Ok(n) => {
                    self.read_buf.advance(n);
                    received = true;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if received {
            trace!("Buffered {} bytes of plaintext", self.read_buf.filled().len());
            self.wrapped
                .push(StreamEvent::DataReceived, Delivery::Immediate, reactor);
        }

        if let Some(e) = failure {
            let class = self
                .wrapped
                .classify(Call::Read, e, false, Delivery::Immediate, reactor);
            if class.is_terminal() {
                self.teardown(reactor);
                return;
            }
            if self.send_blocked && !self.wrapped.write_wants_read {
                self.wrapped.enable_write(reactor);
            }
        }

        if self.read_buf.is_full() {
            // More may be buffered inside the engine with no readiness
            // event left to announce it.
            self.schedule_read(reactor);
        }
    }

    fn schedule_read(&mut self, reactor: &mut dyn Reactor) {
        if self.state != StreamState::Connected || self.delayed_read {
            return;
        }
        self.delayed_read = true;
        reactor.defer(self.wrapped.token());
    }

    fn fail(&mut self, reason: CloseReason, delivery: Delivery, reactor: &mut dyn Reactor) {
        let handshaking = matches!(self.state, StreamState::Connecting(_));
        self.wrapped
            .report_terminal(reason, handshaking, delivery, reactor);
        self.teardown(reactor);
    }

    /// Stop timers, then drop the session before the stream.
    fn teardown(&mut self, reactor: &mut dyn Reactor) {
        self.handshake_timer.stop(reactor);
        self.wrapped.teardown(reactor);
        self.link = Link::Detached;
        self.state = StreamState::Closed;
        self.send_blocked = false;
        self.delayed_read = false;
    }
}
