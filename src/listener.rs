//! Many DTLS clients on one bound port.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use crate::context::Context;
use crate::datagram::DtlsSocket;
use crate::engine::{Engine, Role, Session};
use crate::error::{CloseReason, Error};
use crate::event::DatagramEvent;
use crate::net::{DatagramBinder, DatagramTransport};
use crate::reactor::{Reactor, TimerId, Token};

/// Events from a [`DtlsListener`].
pub enum ListenerEvent<S: Session> {
    /// A client passed the cookie exchange. The socket is connected to it
    /// and now belongs to the owner.
    Accepted(DtlsSocket<S>),
    /// A datagram the listening socket could not use.
    UnexpectedData { from: SocketAddr, data: Vec<u8> },
    /// The bound transport failed. The listener accepts nothing further.
    Failed(CloseReason),
}

/// Accepts DTLS clients on a single bound datagram port.
///
/// One listening socket runs the stateless cookie exchange for every
/// client. When a client presents a valid cookie the listening socket
/// becomes that client's connection and a fresh listening socket takes its
/// place.
pub struct DtlsListener<E: Engine> {
    context: Context<E>,
    transport: Option<Rc<dyn DatagramTransport>>,
    placeholder: Option<DtlsSocket<E::Session>>,
    events: VecDeque<ListenerEvent<E::Session>>,
    accepted: u64,
    failed: bool,
}

impl<E: Engine> DtlsListener<E> {
    /// Create a listener. The context must be a server context.
    pub fn new(context: Context<E>) -> Result<Self, Error> {
        if context.role() != Role::Server {
            return Err(Error::ServerRoleRequired("listener"));
        }

        Ok(DtlsListener {
            context,
            transport: None,
            placeholder: None,
            events: VecDeque::new(),
            accepted: 0,
            failed: false,
        })
    }

    /// Bind `local` and start listening.
    pub fn init(
        &mut self,
        binder: &mut dyn DatagramBinder,
        local: SocketAddr,
        reactor: &mut dyn Reactor,
    ) -> Result<(), Error> {
        if self.transport.is_some() || self.failed {
            return Err(Error::AlreadyInitialized);
        }

        let transport = binder.bind(local)?;
        debug!("Listening on {:?}", transport.local_addr().ok());
        self.transport = Some(transport);

        if let Err(e) = self.spawn_placeholder(reactor) {
            self.transport = None;
            return Err(e);
        }

        Ok(())
    }

    /// The bound address.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref().and_then(|t| t.local_addr().ok())
    }

    pub fn context(&self) -> &Context<E> {
        &self.context
    }

    /// The socket currently running the cookie exchange.
    pub fn placeholder(&self) -> Option<&DtlsSocket<E::Session>> {
        self.placeholder.as_ref()
    }

    /// Token of the listening socket, for routing reactor dispatches.
    pub fn placeholder_token(&self) -> Option<Token> {
        self.placeholder.as_ref().map(|p| p.token())
    }

    /// Number of clients accepted so far.
    pub fn accepted_count(&self) -> u64 {
        self.accepted
    }

    /// Next event for the owner.
    pub fn poll_event(&mut self) -> Option<ListenerEvent<E::Session>> {
        self.events.pop_front()
    }

    /// A datagram arrived from a peer not bound to any accepted socket.
    pub fn handle_datagram(&mut self, data: &[u8], from: SocketAddr, reactor: &mut dyn Reactor) {
        let Some(placeholder) = self.placeholder.as_mut() else {
            trace!("Drop {} bytes from {}, not listening", data.len(), from);
            return;
        };

        placeholder.handle_datagram(data, from, reactor);
        self.collect(Some(from), reactor);
    }

    /// Forwarded readiness for the placeholder's token.
    pub fn handle_writable(&mut self, reactor: &mut dyn Reactor) {
        if let Some(p) = self.placeholder.as_mut() {
            p.handle_writable(reactor);
        }
        self.collect(None, reactor);
    }

    /// Forwarded timer for the placeholder's token.
    pub fn handle_timer(&mut self, id: TimerId, reactor: &mut dyn Reactor) {
        if let Some(p) = self.placeholder.as_mut() {
            p.handle_timer(id, reactor);
        }
        self.collect(None, reactor);
    }

    /// Forwarded end-of-turn dispatch for the placeholder's token.
    pub fn handle_deferred(&mut self, reactor: &mut dyn Reactor) {
        if let Some(p) = self.placeholder.as_mut() {
            p.handle_deferred(reactor);
        }
        self.collect(None, reactor);
    }

    /// The framework reports the bound transport failed.
    ///
    /// This is fatal for the listener. Sockets accepted earlier are not
    /// affected by this call.
    pub fn handle_transport_error(&mut self, err: io::Error, reactor: &mut dyn Reactor) {
        if self.failed {
            return;
        }
        warn!("Listener transport failed: {}", err);
        self.failed = true;
        self.shutdown(reactor);
        self.events
            .push_back(ListenerEvent::Failed(CloseReason::Transport(err.to_string())));
    }

    /// Stop listening and release the bound transport.
    pub fn close(&mut self, reactor: &mut dyn Reactor) {
        self.shutdown(reactor);
    }

    fn shutdown(&mut self, reactor: &mut dyn Reactor) {
        if let Some(mut p) = self.placeholder.take() {
            p.close(reactor);
        }
        self.transport = None;
    }

    fn spawn_placeholder(&mut self, reactor: &mut dyn Reactor) -> Result<(), Error> {
        let Some(transport) = self.transport.as_ref() else {
            return Ok(());
        };

        let token = reactor.next_token();
        let socket = DtlsSocket::new(&self.context, Rc::clone(transport), token, reactor)?;
        self.placeholder = Some(socket);

        Ok(())
    }

    fn replace_placeholder(&mut self, reactor: &mut dyn Reactor) {
        if let Err(e) = self.spawn_placeholder(reactor) {
            warn!("Failed to create listening socket: {}", e);
            self.failed = true;
            self.shutdown(reactor);
            self.events
                .push_back(ListenerEvent::Failed(CloseReason::Unclassified(e.to_string())));
        }
    }

    fn collect(&mut self, from: Option<SocketAddr>, reactor: &mut dyn Reactor) {
        while let Some(event) = self.placeholder.as_mut().and_then(|p| p.poll_event()) {
            match event {
                DatagramEvent::ListenSucceeded(peer) => {
                    let Some(socket) = self.placeholder.take() else {
                        break;
                    };
                    self.accepted += 1;
                    debug!("Accepted {} ({} total)", peer, self.accepted);
                    self.events.push_back(ListenerEvent::Accepted(socket));
                    self.replace_placeholder(reactor);
                    // The fresh placeholder has nothing queued yet.
                    break;
                }
                DatagramEvent::UnexpectedData(data) => {
                    if let Some(from) = from {
                        self.events
                            .push_back(ListenerEvent::UnexpectedData { from, data });
                    }
                }
                DatagramEvent::ConnectFailed(reason) | DatagramEvent::Closed(reason) => {
                    debug!("Listening socket failed: {}", reason);
                    if let Some(mut p) = self.placeholder.take() {
                        p.close(reactor);
                    }
                    self.replace_placeholder(reactor);
                    break;
                }
                _ => {}
            }
        }
    }
}
