//! Session wrapper shared by the stream and datagram sockets.
//!
//! Owns the engine session and turns the engine's error categories into
//! reactor interest changes and owner events.

use crate::engine::{EngineError, Role, Session};
use crate::error::CloseReason;
use crate::event::{Delivery, EventQueue, TerminalEvent};
use crate::reactor::{Interest, Reactor, Token};

/// Which handshake step a connecting socket still has to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    /// Server side, waiting for the client to start.
    Accept,
    /// Client side, initiates the handshake.
    Connect,
}

impl From<Role> for HandshakeRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Client => HandshakeRole::Connect,
            Role::Server => HandshakeRole::Accept,
        }
    }
}

/// The standard outcome of a failed engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Repeat once the transport is readable.
    RetryOnRead,
    /// Repeat once the transport is writable.
    RetryOnWrite,
    /// The peer closed the session.
    CleanShutdown,
    /// The transport failed.
    TransportFailure,
    /// The peer sent invalid protocol data.
    ProtocolFailure,
    /// Anything else.
    Unclassified,
}

impl ErrorClass {
    /// Whether the socket cannot continue.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ErrorClass::RetryOnRead | ErrorClass::RetryOnWrite)
    }
}

impl From<&EngineError> for ErrorClass {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::WantRead => ErrorClass::RetryOnRead,
            EngineError::WantWrite => ErrorClass::RetryOnWrite,
            EngineError::ZeroReturn => ErrorClass::CleanShutdown,
            EngineError::Syscall(_) => ErrorClass::TransportFailure,
            EngineError::Protocol(_) => ErrorClass::ProtocolFailure,
            EngineError::Other(_) => ErrorClass::Unclassified,
        }
    }
}

impl From<EngineError> for CloseReason {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ZeroReturn => CloseReason::CleanShutdown,
            EngineError::Syscall(Some(e)) => CloseReason::Transport(e.to_string()),
            EngineError::Syscall(None) => CloseReason::Transport("unexpected end of stream".into()),
            EngineError::Protocol(s) => CloseReason::Protocol(s),
            EngineError::WantRead | EngineError::WantWrite => {
                CloseReason::Unclassified(err.to_string())
            }
            EngineError::Other(s) => CloseReason::Unclassified(s),
        }
    }
}

/// The engine call an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    Handshake,
    Read,
    Write,
    Listen,
    Timeout,
}

/// An engine session plus the state every socket kind keeps around it.
pub(crate) struct Wrapped<S, E> {
    session: Option<S>,
    /// A read call wanted write. The next writable event repeats the read.
    pub read_wants_write: bool,
    /// A write call wanted read. The next readable event repeats the write.
    pub write_wants_read: bool,
    token: Token,
    interest: Interest,
    registered: bool,
    close_reason: Option<CloseReason>,
    events: EventQueue<E>,
}

impl<S: Session, E: TerminalEvent> Wrapped<S, E> {
    pub fn new(session: S, token: Token) -> Self {
        Wrapped {
            session: Some(session),
            read_wants_write: false,
            write_wants_read: false,
            token,
            interest: Interest::NONE,
            registered: false,
            close_reason: None,
            events: EventQueue::new(),
        }
    }

    /// The session, `None` once torn down.
    pub fn session_mut(&mut self) -> Option<&mut S> {
        self.session.as_mut()
    }

    pub fn session(&self) -> Option<&S> {
        self.session.as_ref()
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    pub fn register(&mut self, reactor: &mut dyn Reactor, interest: Interest) {
        reactor.register(self.token, interest);
        self.interest = interest;
        self.registered = true;
    }

    pub fn set_interest(&mut self, reactor: &mut dyn Reactor, interest: Interest) {
        if !self.registered || self.interest == interest {
            return;
        }
        reactor.set_interest(self.token, interest);
        self.interest = interest;
    }

    pub fn enable_write(&mut self, reactor: &mut dyn Reactor) {
        let interest = self.interest.with_write();
        self.set_interest(reactor, interest);
    }

    pub fn disable_write(&mut self, reactor: &mut dyn Reactor) {
        let interest = self.interest.without_write();
        self.set_interest(reactor, interest);
    }

    /// Queue an event for the owner.
    pub fn push(&mut self, event: E, delivery: Delivery, reactor: &mut dyn Reactor) {
        if delivery == Delivery::Deferred {
            reactor.defer(self.token);
        }
        self.events.push(event, delivery);
    }

    /// Make deferred events visible. Called from the end-of-turn dispatch.
    pub fn promote(&mut self) -> bool {
        self.events.promote()
    }

    pub fn poll_event(&mut self) -> Option<E> {
        self.events.pop()
    }

    /// Classify a failed engine call.
    ///
    /// Retry classes adjust interest and the auxiliary flags. Terminal
    /// classes report `ConnectFailed` (if `handshaking`) or `Closed` once,
    /// with the given delivery. The caller tears down on terminal classes.
    pub fn classify(
        &mut self,
        call: Call,
        err: EngineError,
        handshaking: bool,
        delivery: Delivery,
        reactor: &mut dyn Reactor,
    ) -> ErrorClass {
        let class = ErrorClass::from(&err);

        match class {
            ErrorClass::RetryOnRead => {
                trace!("{:?} wants read", call);
                self.set_interest(reactor, Interest::READ);
                if call == Call::Write {
                    self.write_wants_read = true;
                }
            }
            ErrorClass::RetryOnWrite => {
                trace!("{:?} wants write", call);
                self.enable_write(reactor);
                if call == Call::Read {
                    self.read_wants_write = true;
                }
            }
            _ => {
                debug!("{:?} failed: {}", call, err);
                self.report_terminal(err.into(), handshaking, delivery, reactor);
            }
        }

        if let Some(session) = self.session.as_mut() {
            session.clear_errors();
        }

        class
    }

    /// Report the end of the socket. Only the first report has an effect.
    pub fn report_terminal(
        &mut self,
        reason: CloseReason,
        handshaking: bool,
        delivery: Delivery,
        reactor: &mut dyn Reactor,
    ) {
        if self.close_reason.is_some() {
            return;
        }

        self.close_reason = Some(reason.clone());

        let event = if handshaking {
            E::connect_failed(reason)
        } else {
            E::closed(reason)
        };

        self.push(event, delivery, reactor);
    }

    /// Drop the session and stop readiness delivery.
    ///
    /// Must run before the transport the session writes to is released.
    pub fn teardown(&mut self, reactor: &mut dyn Reactor) {
        self.session = None;
        self.read_wants_write = false;
        self.write_wants_read = false;
        if self.registered {
            reactor.deregister(self.token);
            self.registered = false;
            self.interest = Interest::NONE;
        }
    }
}
