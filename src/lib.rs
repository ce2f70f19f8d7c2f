//! Non-blocking TLS and DTLS sockets for single-threaded reactors.
//!
//! nbtls drives a cryptographic engine (anything implementing [`Engine`])
//! over the application's own non-blocking sockets. It never blocks: every
//! operation either completes, or returns after adjusting the reactor
//! interest so that it is re-driven on the next readiness event or timer.
//!
//! The crate does not call back into the application. Every socket keeps a
//! queue of events that the owner drains with `poll_event()` after each
//! reactor dispatch, in the same spirit as a Sans-IO `poll_output` loop.
//!
//! * [`TlsStream`] wraps a byte stream and speaks TLS.
//! * [`DtlsSocket`] wraps a datagram transport and speaks DTLS, including
//!   stateless cookie listen, retransmission timers and loss accounting.
//! * [`DtlsListener`] accepts many DTLS clients on a single bound port.
//!
//! The reactor, the sockets and the engine are external collaborators,
//! plugged in through [`Reactor`], the traits in [`net`] and the traits in
//! [`engine`].

#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

mod buffer;
mod config;
mod context;
mod cookie;
mod error;
mod event;
mod loss;
mod session;
mod shim;
mod timer;

pub mod certificate;
pub mod datagram;
pub mod engine;
pub mod listener;
pub mod net;
pub mod reactor;
pub mod record;
pub mod stream;

pub use certificate::PeerCertificate;
pub use config::{Config, ConfigBuilder};
pub use context::Context;
pub use cookie::CookieSecret;
pub use datagram::{DtlsSocket, DtlsState};
pub use engine::{Channel, Engine, EngineError, Role, Session, TransportKind};
pub use error::{CloseReason, Error};
pub use event::{DatagramEvent, StreamEvent};
pub use listener::{DtlsListener, ListenerEvent};
pub use reactor::{Interest, Reactor, TimerId, Token};
pub use record::compare_seq;
pub use session::{ErrorClass, HandshakeRole};
pub use stream::{StreamState, TlsStream};
