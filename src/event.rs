//! Events delivered to socket owners.
//!
//! Sockets never call back into their owner. Every notification is queued
//! and the owner drains the queue with `poll_event()` once the call into the
//! socket has returned. Events pushed with [`Delivery::Deferred`] become
//! visible only after the socket's next `handle_deferred`, which the reactor
//! dispatches at the end of the current loop turn.

use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::error::CloseReason;

/// Events from a [`TlsStream`](crate::TlsStream).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The handshake completed.
    Connected,
    /// The connect or handshake failed. No further events follow.
    ConnectFailed(CloseReason),
    /// An established session ended. No further events follow.
    Closed(CloseReason),
    /// Plaintext is waiting in the read buffer.
    DataReceived,
    /// A previously blocked send may be retried.
    ReadyToSend,
}

/// Events from a [`DtlsSocket`](crate::DtlsSocket).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatagramEvent {
    /// The handshake completed.
    Connected,
    /// The handshake failed. No further events follow.
    ConnectFailed(CloseReason),
    /// An established session ended. No further events follow.
    Closed(CloseReason),
    /// One decrypted datagram.
    DataReceived(Vec<u8>),
    /// A previously blocked send may be retried.
    ReadyToSend,
    /// The stateless listen accepted `peer`. The socket is now bound to a
    /// transport connected to that peer.
    ListenSucceeded(SocketAddr),
    /// A datagram that is not DTLS, or not expected in the current state.
    UnexpectedData(Vec<u8>),
}

/// Events that end a socket.
pub(crate) trait TerminalEvent {
    fn connect_failed(reason: CloseReason) -> Self;
    fn closed(reason: CloseReason) -> Self;
}

impl TerminalEvent for StreamEvent {
    fn connect_failed(reason: CloseReason) -> Self {
        StreamEvent::ConnectFailed(reason)
    }

    fn closed(reason: CloseReason) -> Self {
        StreamEvent::Closed(reason)
    }
}

impl TerminalEvent for DatagramEvent {
    fn connect_failed(reason: CloseReason) -> Self {
        DatagramEvent::ConnectFailed(reason)
    }

    fn closed(reason: CloseReason) -> Self {
        DatagramEvent::Closed(reason)
    }
}

/// When a queued event becomes visible to the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// As soon as the current call returns.
    Immediate,
    /// After the next end-of-turn dispatch.
    Deferred,
}

/// Two tier event queue.
#[derive(Debug)]
pub(crate) struct EventQueue<E> {
    ready: VecDeque<E>,
    deferred: VecDeque<E>,
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        EventQueue {
            ready: VecDeque::new(),
            deferred: VecDeque::new(),
        }
    }

    pub fn push(&mut self, event: E, delivery: Delivery) {
        match delivery {
            Delivery::Immediate => self.ready.push_back(event),
            Delivery::Deferred => self.deferred.push_back(event),
        }
    }

    /// Make deferred events visible. Returns true if there were any.
    pub fn promote(&mut self) -> bool {
        let any = !self.deferred.is_empty();
        self.ready.append(&mut self.deferred);
        any
    }

    pub fn pop(&mut self) -> Option<E> {
        self.ready.pop_front()
    }
}
