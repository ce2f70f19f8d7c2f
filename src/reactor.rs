//! The event loop interface consumed by the sockets.
//!
//! A socket never owns a descriptor registration directly. It is identified
//! to the reactor by a [`Token`], and the application dispatches readiness,
//! timers and deferred work for that token back to the socket:
//!
//! * readable/writable readiness → `handle_readable` / `handle_writable`
//! * a fired timer → `handle_timer(id)`
//! * a deferred token → `handle_deferred`
//!
//! Deferred tokens must be dispatched at the end of the current loop turn,
//! before new external readiness is processed.

use std::time::Instant;

/// Identifies one socket to the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub usize);

/// Identifies one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Readiness interest for a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    read: bool,
    write: bool,
}

impl Interest {
    pub const NONE: Interest = Interest {
        read: false,
        write: false,
    };

    pub const READ: Interest = Interest {
        read: true,
        write: false,
    };

    pub const WRITE: Interest = Interest {
        read: false,
        write: true,
    };

    pub const BOTH: Interest = Interest {
        read: true,
        write: true,
    };

    pub fn is_readable(&self) -> bool {
        self.read
    }

    pub fn is_writable(&self) -> bool {
        self.write
    }

    pub fn with_write(self) -> Interest {
        Interest {
            write: true,
            ..self
        }
    }

    pub fn without_write(self) -> Interest {
        Interest {
            write: false,
            ..self
        }
    }
}

/// Single-threaded event loop.
pub trait Reactor {
    /// Monotonic "now" for this loop turn.
    fn now(&self) -> Instant;

    /// Allocate a token for a new socket.
    fn next_token(&mut self) -> Token;

    /// Start delivering readiness for `token`.
    fn register(&mut self, token: Token, interest: Interest);

    /// Replace the readiness interest for `token`.
    fn set_interest(&mut self, token: Token, interest: Interest);

    /// Stop delivering readiness for `token`.
    fn deregister(&mut self, token: Token);

    /// Arm a one-shot timer firing at `at`.
    fn start_timer(&mut self, token: Token, at: Instant) -> TimerId;

    /// Disarm a timer. Stopping an already fired timer is a no-op.
    fn stop_timer(&mut self, id: TimerId);

    /// Dispatch `handle_deferred` for `token` at the end of this loop turn.
    fn defer(&mut self, token: Token);
}
