//! In-memory byte streams and datagram network.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::rc::Rc;

use nbtls::net::{
    message_too_large, ByteStream, DatagramBinder, DatagramTransport, LinkState, PendingStream,
};

// ---------------------------------------------------------------------------
// Streams

struct Pipe {
    buf: VecDeque<u8>,
    cap: usize,
    closed: bool,
}

/// One end of an in-memory stream connection.
pub struct PipeStream {
    rx: Rc<RefCell<Pipe>>,
    tx: Rc<RefCell<Pipe>>,
    local: SocketAddr,
    peer: SocketAddr,
}

/// Observes the inbound side of a [`PipeStream`] after it was moved away.
#[derive(Clone)]
pub struct Probe {
    rx: Rc<RefCell<Pipe>>,
    tx: Rc<RefCell<Pipe>>,
}

impl Probe {
    /// Bytes waiting to be read by the probed end.
    pub fn pending_in(&self) -> usize {
        self.rx.borrow().buf.len()
    }

    /// Whether the probed end could write right now.
    pub fn has_space(&self) -> bool {
        let tx = self.tx.borrow();
        tx.buf.len() < tx.cap
    }

    /// Simulate the remote end closing.
    pub fn close_remote(&self) {
        self.rx.borrow_mut().closed = true;
        self.tx.borrow_mut().closed = true;
    }

    /// Grow the outbound capacity.
    pub fn set_capacity(&self, cap: usize) {
        self.tx.borrow_mut().cap = cap;
    }
}

/// A connected pair with `cap` bytes of buffer in each direction.
pub fn pipe_pair(a: SocketAddr, b: SocketAddr, cap: usize) -> (PipeStream, PipeStream) {
    let ab = Rc::new(RefCell::new(Pipe {
        buf: VecDeque::new(),
        cap,
        closed: false,
    }));
    let ba = Rc::new(RefCell::new(Pipe {
        buf: VecDeque::new(),
        cap,
        closed: false,
    }));

    (
        PipeStream {
            rx: ba.clone(),
            tx: ab.clone(),
            local: a,
            peer: b,
        },
        PipeStream {
            rx: ab,
            tx: ba,
            local: b,
            peer: a,
        },
    )
}

impl PipeStream {
    pub fn probe(&self) -> Probe {
        Probe {
            rx: self.rx.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl Read for PipeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rx = self.rx.borrow_mut();
        if rx.buf.is_empty() {
            if rx.closed {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = rx.buf.len().min(buf.len());
        for (i, b) in rx.buf.drain(..n).enumerate() {
            buf[i] = b;
        }
        Ok(n)
    }
}

impl Write for PipeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut tx = self.tx.borrow_mut();
        if tx.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let space = tx.cap.saturating_sub(tx.buf.len());
        if space == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = space.min(buf.len());
        tx.buf.extend(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for PipeStream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.peer)
    }
}

/// A connect that completes when the test says so.
pub struct PendingPipe {
    stream: Option<PipeStream>,
    ready: Rc<Cell<bool>>,
    refused: Rc<Cell<bool>>,
}

/// Test side controls of a [`PendingPipe`].
#[derive(Clone)]
pub struct ConnectControl {
    ready: Rc<Cell<bool>>,
    refused: Rc<Cell<bool>>,
}

impl ConnectControl {
    pub fn complete(&self) {
        self.ready.set(true);
    }

    pub fn refuse(&self) {
        self.refused.set(true);
    }
}

pub fn pending(stream: PipeStream) -> (PendingPipe, ConnectControl) {
    let ready = Rc::new(Cell::new(false));
    let refused = Rc::new(Cell::new(false));
    (
        PendingPipe {
            stream: Some(stream),
            ready: ready.clone(),
            refused: refused.clone(),
        },
        ConnectControl { ready, refused },
    )
}

impl PendingStream for PendingPipe {
    type Stream = PipeStream;

    fn take_connected(&mut self) -> io::Result<Option<PipeStream>> {
        if self.refused.get() {
            return Err(io::ErrorKind::ConnectionRefused.into());
        }
        if !self.ready.get() {
            return Ok(None);
        }
        Ok(self.stream.take())
    }
}

// ---------------------------------------------------------------------------
// Datagrams

#[derive(Debug, Clone)]
pub struct Datagram {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub data: Vec<u8>,
}

struct NetInner {
    queue: VecDeque<Datagram>,
    max_datagram: usize,
}

/// An in-memory datagram network. Sent datagrams queue up until the test
/// takes and routes them.
#[derive(Clone)]
pub struct LoopNet {
    inner: Rc<RefCell<NetInner>>,
}

impl LoopNet {
    pub fn new() -> Self {
        LoopNet {
            inner: Rc::new(RefCell::new(NetInner {
                queue: VecDeque::new(),
                max_datagram: 1472,
            })),
        }
    }

    /// Sends larger than this fail with EMSGSIZE.
    pub fn set_max_datagram(&self, max: usize) {
        self.inner.borrow_mut().max_datagram = max;
    }

    /// A transport at `local` connected to `peer`.
    pub fn connect(&self, local: SocketAddr, peer: SocketAddr) -> Rc<LoopUdp> {
        Rc::new(LoopUdp {
            net: self.inner.clone(),
            local,
            peer: Some(peer),
        })
    }

    /// An unconnected transport at `local`.
    pub fn unconnected(&self, local: SocketAddr) -> Rc<LoopUdp> {
        Rc::new(LoopUdp {
            net: self.inner.clone(),
            local,
            peer: None,
        })
    }

    pub fn pop(&self) -> Option<Datagram> {
        self.inner.borrow_mut().queue.pop_front()
    }

    pub fn take_all(&self) -> Vec<Datagram> {
        self.inner.borrow_mut().queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().queue.len()
    }
}

impl DatagramBinder for LoopNet {
    fn bind(&mut self, local: SocketAddr) -> io::Result<Rc<dyn DatagramTransport>> {
        Ok(self.unconnected(local))
    }
}

pub struct LoopUdp {
    net: Rc<RefCell<NetInner>>,
    local: SocketAddr,
    peer: Option<SocketAddr>,
}

impl LoopUdp {
    fn push(&self, buf: &[u8], to: SocketAddr) -> io::Result<usize> {
        let mut net = self.net.borrow_mut();
        if buf.len() > net.max_datagram {
            return Err(message_too_large());
        }
        net.queue.push_back(Datagram {
            from: self.local,
            to,
            data: buf.to_vec(),
        });
        Ok(buf.len())
    }
}

impl DatagramTransport for LoopUdp {
    fn state(&self) -> LinkState {
        if self.peer.is_some() {
            LinkState::Connected
        } else {
            LinkState::Unconnected
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        match self.peer {
            Some(peer) => self.push(buf, peer),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn send_to(&self, buf: &[u8], peer: SocketAddr) -> io::Result<usize> {
        self.push(buf, peer)
    }

    fn bind_peer(&self, peer: SocketAddr) -> io::Result<Rc<dyn DatagramTransport>> {
        Ok(Rc::new(LoopUdp {
            net: self.net.clone(),
            local: self.local,
            peer: Some(peer),
        }))
    }
}
