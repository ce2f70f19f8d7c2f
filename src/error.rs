use std::io;

use thiserror::Error;

use crate::engine::EngineError;

/// Errors returned synchronously by socket and listener operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Socket is not connected")]
    NotConnected,

    #[error("Listener is already initialized")]
    AlreadyInitialized,

    #[error("Datagram transport is neither connected nor connecting")]
    Unconnected,

    #[error("Server role required for {0}")]
    ServerRoleRequired(&'static str),

    #[error("Socket closed: {0}")]
    Closed(CloseReason),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Config error: {0}")]
    Config(String),
}

/// Why a socket stopped.
///
/// Reported exactly once per socket through a `Closed` or `ConnectFailed`
/// event, and kept on the socket afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloseReason {
    /// The peer closed the session cleanly (close-notify).
    #[error("peer shut down cleanly")]
    CleanShutdown,

    /// The underlying transport failed or went away.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The peer sent malformed or invalid protocol records.
    #[error("protocol failure: {0}")]
    Protocol(String),

    /// The engine failed for a reason it could not classify.
    #[error("unclassified failure: {0}")]
    Unclassified(String),

    /// The handshake did not complete within the configured timeout.
    #[error("handshake timed out")]
    HandshakeTimeout,
}
