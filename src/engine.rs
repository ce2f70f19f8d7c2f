//! The cryptographic engine contract.
//!
//! The engine implements the TLS/DTLS protocol: handshake, record
//! protection and alerts. nbtls drives it, and gives it a [`Channel`] for
//! every call through which the engine reads and writes ciphertext and asks
//! transport questions (peer, MTU, cookies, retransmit deadline).
//!
//! Engine calls never block. A call that cannot make progress returns
//! [`EngineError::WantRead`] or [`EngineError::WantWrite`] and is repeated
//! once the transport is ready.

use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use thiserror::Error;

/// Which end of the handshake a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Which record layer a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// TLS over a byte stream.
    Stream,
    /// DTLS over datagrams.
    Datagram,
}

/// Error categories reported by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Call again once the transport is readable.
    #[error("engine wants read")]
    WantRead,

    /// Call again once the transport is writable.
    #[error("engine wants write")]
    WantWrite,

    /// The peer sent close-notify.
    #[error("peer closed the session")]
    ZeroReturn,

    /// The transport failed. `None` for an unexpected end of stream.
    #[error("transport error: {0:?}")]
    Syscall(Option<io::Error>),

    /// Invalid or malformed protocol data.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

/// The transport as seen by the engine.
///
/// Only `read` and `write` are required. The remaining methods answer the
/// datagram specific questions and have stream-appropriate defaults.
pub trait Channel {
    /// Read ciphertext. `WouldBlock` when nothing is available, `Ok(0)` at
    /// end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write ciphertext. `WouldBlock` when the transport is full.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Largest record payload the link carries, after IP/UDP overhead.
    fn mtu(&self) -> Option<usize> {
        None
    }

    /// IP/UDP header overhead for the peer's address family.
    fn mtu_overhead(&self) -> usize {
        0
    }

    /// Conservative MTU to fall back to after a write was too large.
    fn fallback_mtu(&self) -> Option<usize> {
        None
    }

    /// Store the deadline for the next retransmission, `None` to clear.
    fn set_retransmit_deadline(&mut self, _at: Option<Instant>) {}

    fn retransmit_deadline(&self) -> Option<Instant> {
        None
    }

    /// Cookie for the stateless listen exchange, bound to the current peer.
    fn generate_cookie(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn verify_cookie(&self, _cookie: &[u8]) -> bool {
        false
    }

    /// In peek mode, `read` leaves the returned data in place.
    fn set_peek(&mut self, _peek: bool) {}

    /// Whether a write was rejected as too large since the last call.
    /// Clears the flag.
    fn take_mtu_exceeded(&mut self) -> bool {
        false
    }
}

/// One cryptographic session.
pub trait Session {
    /// Advance the handshake. `Ok(())` once it has completed.
    fn handshake(&mut self, io: &mut dyn Channel) -> Result<(), EngineError>;

    /// Decrypt plaintext into `buf`.
    fn read(&mut self, io: &mut dyn Channel, buf: &mut [u8]) -> Result<usize, EngineError>;

    /// Encrypt and send plaintext. Returns the number of bytes accepted,
    /// which may be less than `buf.len()`. A zero-length write flushes
    /// pending engine output.
    fn write(&mut self, io: &mut dyn Channel, buf: &[u8]) -> Result<usize, EngineError>;

    /// Stateless DTLS listen. Consumes the datagram staged in `io`, answers
    /// with a cookie challenge where needed, and returns the peer once a
    /// ClientHello with a valid cookie arrived.
    fn listen(&mut self, _io: &mut dyn Channel) -> Result<SocketAddr, EngineError> {
        Err(EngineError::Other("stateless listen not supported".into()))
    }

    /// The retransmit deadline set through the channel passed. Called when
    /// it has expired.
    fn handle_timeout(&mut self, _io: &mut dyn Channel) -> Result<(), EngineError> {
        Ok(())
    }

    /// Send close-notify.
    fn shutdown(&mut self, _io: &mut dyn Channel) -> Result<(), EngineError> {
        Ok(())
    }

    /// Hint the largest record payload the link carries.
    fn set_mtu(&mut self, _mtu: usize) {}

    /// Discard any errors the engine queued.
    fn clear_errors(&mut self) {}

    /// The peer's end-entity certificate, DER encoded.
    fn peer_certificate(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Factory of sessions.
pub trait Engine {
    type Session: Session;

    fn new_session(&self, role: Role, kind: TransportKind) -> Result<Self::Session, EngineError>;
}
