//! A toy engine speaking a DTLS-shaped record format.
//!
//! Records carry a real 13 byte DTLS header so the framing checks of the
//! sockets apply. "Encryption" is a XOR plus a fixed 8 byte tag.
//!
//! Handshake:
//!
//! ```text
//! Client                       Server
//! ClientHello(cookie) ------>
//!                     <------  HelloVerifyRequest(cookie)   (listen only)
//! ClientHello(cookie) ------>
//!                     <------  ServerHello
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use nbtls::{Channel, Engine, EngineError, Role, Session, TransportKind};

pub const CHANGE_CIPHER_SPEC: u8 = 20;
pub const ALERT: u8 = 21;
pub const HANDSHAKE: u8 = 22;
pub const APPLICATION_DATA: u8 = 23;

pub const CLIENT_HELLO: u8 = 1;
pub const SERVER_HELLO: u8 = 2;
pub const HELLO_VERIFY_REQUEST: u8 = 3;

pub const TAG: [u8; 8] = [0xAA; 8];
const KEY: u8 = 0x5A;

pub const RETRANSMIT_AFTER: Duration = Duration::from_secs(1);

/// Build one record.
pub fn record(ctype: u8, epoch: u16, seq: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(13 + payload.len());
    out.push(ctype);
    out.extend_from_slice(&[0xFE, 0xFD]);
    out.extend_from_slice(&epoch.to_be_bytes());
    out.extend_from_slice(&seq.to_be_bytes()[2..]);
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Build a protected application data record.
pub fn app_record(epoch: u16, seq: u64, plaintext: &[u8]) -> Vec<u8> {
    let mut payload: Vec<u8> = plaintext.iter().map(|b| b ^ KEY).collect();
    payload.extend_from_slice(&TAG);
    record(APPLICATION_DATA, epoch, seq, &payload)
}

/// Parse the first complete record: (type, epoch, seq, payload, consumed).
pub fn parse_record(buf: &[u8]) -> Option<(u8, u16, u64, Vec<u8>, usize)> {
    if buf.len() < 13 {
        return None;
    }
    let ctype = buf[0];
    let epoch = u16::from_be_bytes([buf[3], buf[4]]);
    let mut seq = [0u8; 8];
    seq[2..].copy_from_slice(&buf[5..11]);
    let len = u16::from_be_bytes([buf[11], buf[12]]) as usize;
    if buf.len() < 13 + len {
        return None;
    }
    Some((
        ctype,
        epoch,
        u64::from_be_bytes(seq),
        buf[13..13 + len].to_vec(),
        13 + len,
    ))
}

fn open(payload: &[u8]) -> Result<Vec<u8>, EngineError> {
    if payload.len() < TAG.len() || payload[payload.len() - TAG.len()..] != TAG {
        return Err(EngineError::Protocol("bad record mac".into()));
    }
    Ok(payload[..payload.len() - TAG.len()]
        .iter()
        .map(|b| b ^ KEY)
        .collect())
}

/// Counters shared by every session of one engine.
#[derive(Debug, Default)]
pub struct Stats {
    /// Every engine entry point.
    pub calls: usize,
    pub hellos_sent: usize,
    pub verify_requests: usize,
    pub retransmits: usize,
    pub shutdowns: usize,
    pub mtu: Option<usize>,
}

/// Behaviour switches.
#[derive(Debug, Clone)]
pub struct Knobs {
    /// Handshakes fail with a protocol error.
    pub fail_handshake: bool,
    /// DER certificate reported for the peer once established.
    pub peer_cert: Option<Vec<u8>>,
    /// Largest plaintext per stream record.
    pub max_fragment: usize,
    /// Datagram reads that decrypt a record but then want write before
    /// handing out the plaintext.
    pub stall_reads: usize,
    /// Datagram writes that want read before sending anything.
    pub stall_writes: usize,
}

impl Default for Knobs {
    fn default() -> Self {
        Knobs {
            fail_handshake: false,
            peer_cert: None,
            max_fragment: 1024,
            stall_reads: 0,
            stall_writes: 0,
        }
    }
}

#[derive(Clone)]
pub struct ToyEngine {
    clock: Rc<Cell<Instant>>,
    stats: Rc<RefCell<Stats>>,
    knobs: Knobs,
}

impl ToyEngine {
    pub fn new(clock: Rc<Cell<Instant>>) -> Self {
        ToyEngine {
            clock,
            stats: Rc::new(RefCell::new(Stats::default())),
            knobs: Knobs::default(),
        }
    }

    pub fn with_knobs(mut self, knobs: Knobs) -> Self {
        self.knobs = knobs;
        self
    }

    pub fn stats(&self) -> Rc<RefCell<Stats>> {
        self.stats.clone()
    }
}

impl Engine for ToyEngine {
    type Session = ToySession;

    fn new_session(&self, role: Role, kind: TransportKind) -> Result<ToySession, EngineError> {
        Ok(ToySession {
            role,
            kind,
            clock: self.clock.clone(),
            stats: self.stats.clone(),
            knobs: self.knobs.clone(),
            established: false,
            hello_sent: false,
            cookie: Vec::new(),
            last_flight: None,
            hs_seq: 0,
            app_seq: 0,
            mtu: None,
            inbuf: Vec::new(),
            plain: VecDeque::new(),
            out: Vec::new(),
            stalled_reads: 0,
            stalled_writes: 0,
        })
    }
}

pub struct ToySession {
    role: Role,
    kind: TransportKind,
    clock: Rc<Cell<Instant>>,
    stats: Rc<RefCell<Stats>>,
    knobs: Knobs,
    established: bool,
    hello_sent: bool,
    cookie: Vec<u8>,
    last_flight: Option<Vec<u8>>,
    hs_seq: u64,
    app_seq: u64,
    mtu: Option<usize>,
    inbuf: Vec<u8>,
    plain: VecDeque<u8>,
    out: Vec<u8>,
    stalled_reads: usize,
    stalled_writes: usize,
}

impl ToySession {
    fn enter(&self) {
        self.stats.borrow_mut().calls += 1;
    }

    fn io_error(e: io::Error) -> EngineError {
        if e.kind() == io::ErrorKind::WouldBlock {
            EngineError::WantWrite
        } else {
            EngineError::Syscall(Some(e))
        }
    }

    /// Push pending stream output.
    fn flush_out(&mut self, io: &mut dyn Channel) -> Result<(), EngineError> {
        while !self.out.is_empty() {
            match io.write(&self.out) {
                Ok(0) => return Err(EngineError::Syscall(None)),
                Ok(n) => {
                    self.out.drain(..n);
                }
                Err(e) => return Err(Self::io_error(e)),
            }
        }
        Ok(())
    }

    fn send(&mut self, io: &mut dyn Channel, rec: Vec<u8>) -> Result<(), EngineError> {
        match self.kind {
            TransportKind::Stream => {
                self.out.extend_from_slice(&rec);
                self.flush_out(io)
            }
            TransportKind::Datagram => match io.write(&rec) {
                Ok(_) => Ok(()),
                Err(e) => {
                    if io.take_mtu_exceeded() {
                        self.mtu = io.fallback_mtu();
                        self.stats.borrow_mut().mtu = self.mtu;
                    }
                    Err(Self::io_error(e))
                }
            },
        }
    }

    fn next_record(&mut self, io: &mut dyn Channel) -> Result<(u8, u16, Vec<u8>), EngineError> {
        match self.kind {
            TransportKind::Datagram => {
                let mut buf = vec![0u8; 65536];
                let n = match io.read(&mut buf) {
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Err(EngineError::WantRead)
                    }
                    Err(e) => return Err(EngineError::Syscall(Some(e))),
                };
                let (ctype, epoch, _, payload, _) = parse_record(&buf[..n])
                    .ok_or_else(|| EngineError::Protocol("truncated record".into()))?;
                Ok((ctype, epoch, payload))
            }
            TransportKind::Stream => loop {
                if let Some((ctype, epoch, _, payload, used)) = parse_record(&self.inbuf) {
                    self.inbuf.drain(..used);
                    return Ok((ctype, epoch, payload));
                }
                let mut buf = [0u8; 4096];
                match io.read(&mut buf) {
                    Ok(0) => return Err(EngineError::Syscall(None)),
                    Ok(n) => self.inbuf.extend_from_slice(&buf[..n]),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Err(EngineError::WantRead)
                    }
                    Err(e) => return Err(EngineError::Syscall(Some(e))),
                }
            },
        }
    }

    fn send_hello(&mut self, io: &mut dyn Channel) -> Result<(), EngineError> {
        let mut payload = vec![CLIENT_HELLO];
        payload.extend_from_slice(&self.cookie);
        let rec = record(HANDSHAKE, 0, self.hs_seq, &payload);
        self.hs_seq += 1;
        self.hello_sent = true;
        self.last_flight = Some(rec.clone());
        self.stats.borrow_mut().hellos_sent += 1;
        io.set_retransmit_deadline(Some(self.clock.get() + RETRANSMIT_AFTER));
        self.send(io, rec)
    }

    fn send_server_hello(&mut self, io: &mut dyn Channel) -> Result<(), EngineError> {
        let rec = record(HANDSHAKE, 0, self.hs_seq, &[SERVER_HELLO]);
        self.hs_seq += 1;
        self.send(io, rec)
    }

    fn complete(&mut self, io: &mut dyn Channel) {
        self.established = true;
        self.last_flight = None;
        io.set_retransmit_deadline(None);
    }
}

impl Session for ToySession {
    fn handshake(&mut self, io: &mut dyn Channel) -> Result<(), EngineError> {
        self.enter();

        if self.established {
            return Ok(());
        }

        if self.knobs.fail_handshake {
            return Err(EngineError::Protocol("handshake failure".into()));
        }

        match self.role {
            Role::Client => {
                if !self.hello_sent {
                    self.send_hello(io)?;
                }
                loop {
                    let (ctype, _, payload) = self.next_record(io)?;
                    if ctype != HANDSHAKE {
                        return Err(EngineError::Protocol("unexpected record".into()));
                    }
                    match payload.first() {
                        Some(&HELLO_VERIFY_REQUEST) => {
                            self.cookie = payload[1..].to_vec();
                            self.send_hello(io)?;
                        }
                        Some(&SERVER_HELLO) => {
                            self.complete(io);
                            return Ok(());
                        }
                        _ => return Err(EngineError::Protocol("unexpected handshake".into())),
                    }
                }
            }
            Role::Server => {
                let (ctype, _, payload) = self.next_record(io)?;
                if ctype != HANDSHAKE || payload.first() != Some(&CLIENT_HELLO) {
                    return Err(EngineError::Protocol("expected ClientHello".into()));
                }
                self.send_server_hello(io)?;
                self.complete(io);
                Ok(())
            }
        }
    }

    fn read(&mut self, io: &mut dyn Channel, buf: &mut [u8]) -> Result<usize, EngineError> {
        self.enter();

        if !self.plain.is_empty() {
            let n = self.plain.len().min(buf.len());
            for (i, b) in self.plain.drain(..n).enumerate() {
                buf[i] = b;
            }
            return Ok(n);
        }

        loop {
            let (ctype, _, payload) = self.next_record(io)?;
            match ctype {
                APPLICATION_DATA => {
                    let plain = open(&payload)?;
                    if self.kind == TransportKind::Datagram
                        && self.stalled_reads < self.knobs.stall_reads
                    {
                        self.stalled_reads += 1;
                        self.plain.extend(&plain);
                        return Err(EngineError::WantWrite);
                    }
                    let n = plain.len().min(buf.len());
                    buf[..n].copy_from_slice(&plain[..n]);
                    self.plain.extend(&plain[n..]);
                    return Ok(n);
                }
                ALERT => return Err(EngineError::ZeroReturn),
                HANDSHAKE | CHANGE_CIPHER_SPEC => {
                    if self.kind == TransportKind::Datagram {
                        return Ok(0);
                    }
                }
                _ => return Err(EngineError::Protocol("unknown content type".into())),
            }
        }
    }

    fn write(&mut self, io: &mut dyn Channel, buf: &[u8]) -> Result<usize, EngineError> {
        self.enter();

        if !self.established {
            return Err(EngineError::Other("not established".into()));
        }

        match self.kind {
            TransportKind::Datagram => {
                if buf.is_empty() {
                    return Ok(0);
                }
                if self.stalled_writes < self.knobs.stall_writes {
                    self.stalled_writes += 1;
                    return Err(EngineError::WantRead);
                }
                let rec = app_record(1, self.app_seq, buf);
                self.app_seq += 1;
                self.send(io, rec)?;
                Ok(buf.len())
            }
            TransportKind::Stream => {
                self.flush_out(io)?;
                if buf.is_empty() {
                    return Ok(0);
                }
                let n = buf.len().min(self.knobs.max_fragment);
                let rec = app_record(1, self.app_seq, &buf[..n]);
                self.app_seq += 1;
                self.out.extend_from_slice(&rec);
                match self.flush_out(io) {
                    Ok(()) | Err(EngineError::WantWrite) => Ok(n),
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn listen(&mut self, io: &mut dyn Channel) -> Result<SocketAddr, EngineError> {
        self.enter();

        let (ctype, _, payload) = self.next_record(io)?;
        if ctype != HANDSHAKE || payload.first() != Some(&CLIENT_HELLO) {
            return Err(EngineError::WantRead);
        }

        let cookie = &payload[1..];
        if cookie.is_empty() || !io.verify_cookie(cookie) {
            let Some(fresh) = io.generate_cookie() else {
                return Err(EngineError::Other("no cookie secret".into()));
            };
            let mut hvr = vec![HELLO_VERIFY_REQUEST];
            hvr.extend_from_slice(&fresh);
            let rec = record(HANDSHAKE, 0, self.hs_seq, &hvr);
            self.hs_seq += 1;
            self.stats.borrow_mut().verify_requests += 1;
            self.send(io, rec)?;
            return Err(EngineError::WantRead);
        }

        let peer = io
            .peer_addr()
            .ok_or_else(|| EngineError::Other("no peer".into()))?;
        self.send_server_hello(io)?;
        self.complete(io);
        Ok(peer)
    }

    fn handle_timeout(&mut self, io: &mut dyn Channel) -> Result<(), EngineError> {
        self.enter();

        let Some(flight) = self.last_flight.clone() else {
            return Ok(());
        };

        self.stats.borrow_mut().retransmits += 1;
        io.set_retransmit_deadline(Some(self.clock.get() + RETRANSMIT_AFTER));
        self.send(io, flight)
    }

    fn shutdown(&mut self, io: &mut dyn Channel) -> Result<(), EngineError> {
        self.enter();
        self.stats.borrow_mut().shutdowns += 1;

        if !self.established {
            return Ok(());
        }

        let rec = record(ALERT, 1, self.app_seq, &[1, 0]);
        self.app_seq += 1;
        self.send(io, rec)
    }

    fn set_mtu(&mut self, mtu: usize) {
        self.mtu = Some(mtu);
        self.stats.borrow_mut().mtu = Some(mtu);
    }

    fn peer_certificate(&self) -> Option<Vec<u8>> {
        if self.established {
            self.knobs.peer_cert.clone()
        } else {
            None
        }
    }
}
