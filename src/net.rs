//! The socket framework interface consumed by the sockets.
//!
//! All implementations are expected to be non-blocking: an operation that
//! cannot make progress returns `io::ErrorKind::WouldBlock`.

use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

/// A connected, non-blocking byte stream.
pub trait ByteStream: io::Read + io::Write {
    fn local_addr(&self) -> io::Result<SocketAddr>;
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

/// A byte stream whose connect is still in progress.
pub trait PendingStream {
    type Stream: ByteStream;

    /// Returns the connected stream once the connect has finished.
    ///
    /// Ownership of the connection moves to the caller. After returning
    /// `Some`, the pending object is no longer used.
    fn take_connected(&mut self) -> io::Result<Option<Self::Stream>>;
}

/// Connection state of a datagram transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Bound, accepting datagrams from any peer.
    Unconnected,
    /// Connect in progress.
    Connecting,
    /// Associated with a single peer.
    Connected,
    /// Closed, or failed.
    Closed,
}

/// A non-blocking datagram socket.
///
/// Shared through `Rc` between a listener, its listening placeholder and any
/// sockets using it. The last reference to drop closes it.
pub trait DatagramTransport {
    fn state(&self) -> LinkState;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// The associated peer, if connected.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Send on a connected transport.
    fn send(&self, buf: &[u8]) -> io::Result<usize>;

    /// Send to an explicit peer.
    fn send_to(&self, buf: &[u8], peer: SocketAddr) -> io::Result<usize>;

    /// Create a transport sharing this local address, connected to `peer`.
    ///
    /// The framework demultiplexes subsequent datagrams from `peer` to the
    /// returned transport instead of this one.
    fn bind_peer(&self, peer: SocketAddr) -> io::Result<Rc<dyn DatagramTransport>>;
}

/// Creates bound datagram transports.
pub trait DatagramBinder {
    fn bind(&mut self, local: SocketAddr) -> io::Result<Rc<dyn DatagramTransport>>;
}

#[cfg(not(windows))]
const EMSGSIZE: i32 = libc::EMSGSIZE;

#[cfg(windows)]
const EMSGSIZE: i32 = 10040; // WSAEMSGSIZE

/// Whether a send failed because the datagram exceeds the path MTU.
pub(crate) fn is_message_too_large(err: &io::Error) -> bool {
    err.raw_os_error() == Some(EMSGSIZE)
}

/// An `io::Error` as produced by a send exceeding the path MTU.
pub fn message_too_large() -> io::Error {
    io::Error::from_raw_os_error(EMSGSIZE)
}
