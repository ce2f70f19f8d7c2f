//! In-memory reactor with a virtual clock.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};

use nbtls::{Interest, Reactor, TimerId, Token};

pub struct LoopReactor {
    clock: Rc<Cell<Instant>>,
    next_token: usize,
    next_timer: u64,
    interest: HashMap<Token, Interest>,
    timers: BTreeMap<TimerId, (Token, Instant)>,
    deferred: Vec<Token>,
    pub deregistered: Vec<Token>,
    pub stopped: Vec<TimerId>,
}

impl LoopReactor {
    pub fn new() -> Self {
        LoopReactor {
            clock: Rc::new(Cell::new(Instant::now())),
            next_token: 1,
            next_timer: 1,
            interest: HashMap::new(),
            timers: BTreeMap::new(),
            deferred: Vec::new(),
            deregistered: Vec::new(),
            stopped: Vec::new(),
        }
    }

    /// The clock shared with the toy engine.
    pub fn clock(&self) -> Rc<Cell<Instant>> {
        self.clock.clone()
    }

    pub fn advance(&mut self, d: Duration) {
        self.clock.set(self.clock.get() + d);
    }

    pub fn interest_of(&self, token: Token) -> Interest {
        self.interest.get(&token).copied().unwrap_or(Interest::NONE)
    }

    pub fn is_registered(&self, token: Token) -> bool {
        self.interest.contains_key(&token)
    }

    /// Timers armed for `token`.
    pub fn timers_for(&self, token: Token) -> Vec<(TimerId, Instant)> {
        self.timers
            .iter()
            .filter(|(_, (t, _))| *t == token)
            .map(|(id, (_, at))| (*id, *at))
            .collect()
    }

    /// Remove and return timers that are due.
    pub fn due_timers(&mut self) -> Vec<(Token, TimerId)> {
        let now = self.clock.get();
        let due: Vec<_> = self
            .timers
            .iter()
            .filter(|(_, (_, at))| *at <= now)
            .map(|(id, (token, _))| (*token, *id))
            .collect();
        for (_, id) in &due {
            self.timers.remove(id);
        }
        due
    }

    /// Tokens deferred to the end of this turn, deduplicated.
    pub fn take_deferred(&mut self) -> Vec<Token> {
        let mut out: Vec<Token> = Vec::new();
        for t in self.deferred.drain(..) {
            if !out.contains(&t) {
                out.push(t);
            }
        }
        out
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }
}

impl Reactor for LoopReactor {
    fn now(&self) -> Instant {
        self.clock.get()
    }

    fn next_token(&mut self) -> Token {
        let t = Token(self.next_token);
        self.next_token += 1;
        t
    }

    fn register(&mut self, token: Token, interest: Interest) {
        self.interest.insert(token, interest);
    }

    fn set_interest(&mut self, token: Token, interest: Interest) {
        self.interest.insert(token, interest);
    }

    fn deregister(&mut self, token: Token) {
        self.interest.remove(&token);
        self.deregistered.push(token);
    }

    fn start_timer(&mut self, token: Token, at: Instant) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        self.timers.insert(id, (token, at));
        id
    }

    fn stop_timer(&mut self, id: TimerId) {
        if self.timers.remove(&id).is_some() {
            self.stopped.push(id);
        }
    }

    fn defer(&mut self, token: Token) {
        self.deferred.push(token);
    }
}
