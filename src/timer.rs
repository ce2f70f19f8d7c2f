use std::time::Instant;

use crate::reactor::{Reactor, TimerId, Token};

/// A socket's claim on at most one armed reactor timer.
///
/// The socket owns the timer exclusively and must `stop` it before the
/// transport the timer protects is released.
#[derive(Debug, Default)]
pub(crate) struct TimerSlot {
    armed: Option<(TimerId, Instant)>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for `at`, replacing any timer armed for a different deadline.
    pub fn arm(&mut self, reactor: &mut dyn Reactor, token: Token, at: Instant) {
        if let Some((_, current)) = self.armed {
            if current == at {
                return;
            }
        }
        self.stop(reactor);
        let id = reactor.start_timer(token, at);
        self.armed = Some((id, at));
    }

    /// Arm, or stop when the deadline is gone.
    pub fn reconcile(&mut self, reactor: &mut dyn Reactor, token: Token, at: Option<Instant>) {
        match at {
            Some(at) => self.arm(reactor, token, at),
            None => self.stop(reactor),
        }
    }

    pub fn stop(&mut self, reactor: &mut dyn Reactor) {
        if let Some((id, _)) = self.armed.take() {
            reactor.stop_timer(id);
        }
    }

    /// Whether `id` is this slot's timer. A fired timer is disarmed.
    pub fn fired(&mut self, id: TimerId) -> bool {
        match self.armed {
            Some((armed, _)) if armed == id => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.armed.map(|(_, at)| at)
    }
}
