use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use crate::cookie::CookieSecret;
use crate::engine::Channel;
use crate::net::{is_message_too_large, DatagramTransport, LinkState};

/// IPv4 (20) + UDP (8) header bytes.
const IPV4_OVERHEAD: usize = 28;
/// IPv6 (40) + UDP (8) header bytes.
const IPV6_OVERHEAD: usize = 48;
/// Minimum reassembly size every IPv4 host accepts.
const IPV4_MIN_MTU: usize = 576;
/// Minimum link MTU of IPv6.
const IPV6_MIN_MTU: usize = 1280;

/// Datagram channel handed to the engine.
///
/// Bridges engine I/O to a shared datagram transport. Inbound datagrams are
/// not read from the transport but staged by the datagram socket, one at a
/// time, right before it calls into the engine.
pub(crate) struct Shim {
    transport: Option<Rc<dyn DatagramTransport>>,
    inbound: Option<Vec<u8>>,
    /// Sender of the staged datagram. Outlives the data once the engine
    /// consumes it, until the engine call returns.
    inbound_from: Option<SocketAddr>,
    link_mtu: usize,
    cookie_secret: Option<Arc<CookieSecret>>,
    retransmit_deadline: Option<Instant>,
    test_mode: bool,
    test_written: usize,
    peek: bool,
    mtu_exceeded: bool,
}

impl Shim {
    pub fn new(
        transport: Rc<dyn DatagramTransport>,
        link_mtu: usize,
        cookie_secret: Option<Arc<CookieSecret>>,
    ) -> Self {
        Shim {
            transport: Some(transport),
            inbound: None,
            inbound_from: None,
            link_mtu,
            cookie_secret,
            retransmit_deadline: None,
            test_mode: false,
            test_written: 0,
            peek: false,
            mtu_exceeded: false,
        }
    }

    pub fn transport(&self) -> Option<&Rc<dyn DatagramTransport>> {
        self.transport.as_ref()
    }

    /// Switch to another transport, such as a peer-bound one after listen.
    pub fn rebind(&mut self, transport: Rc<dyn DatagramTransport>) {
        self.clear_staged();
        self.transport = Some(transport);
    }

    /// Drop the transport reference.
    pub fn detach(&mut self) {
        self.clear_staged();
        self.retransmit_deadline = None;
        self.transport = None;
    }

    /// Make one inbound datagram available to the next engine read.
    pub fn stage(&mut self, data: &[u8], from: SocketAddr) {
        self.inbound = Some(data.to_vec());
        self.inbound_from = Some(from);
    }

    /// Forget whatever the engine did not consume.
    pub fn clear_staged(&mut self) {
        self.inbound = None;
        self.inbound_from = None;
    }

    /// Count writes instead of sending them.
    pub fn begin_test_write(&mut self) {
        self.test_mode = true;
        self.test_written = 0;
    }

    /// Leave test-write mode, returning the bytes that would have been sent.
    pub fn end_test_write(&mut self) -> usize {
        self.test_mode = false;
        std::mem::take(&mut self.test_written)
    }

    fn link_peer(&self) -> Option<SocketAddr> {
        self.transport.as_ref().and_then(|t| t.peer_addr())
    }

    fn is_ipv6(&self) -> bool {
        if let Some(peer) = self.peer_addr() {
            return peer.is_ipv6();
        }
        self.transport
            .as_ref()
            .and_then(|t| t.local_addr().ok())
            .map(|a| a.is_ipv6())
            .unwrap_or(false)
    }
}

impl Channel for Shim {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(staged) = self.inbound.as_ref() else {
            return Err(io::ErrorKind::WouldBlock.into());
        };

        let n = staged.len().min(buf.len());
        buf[..n].copy_from_slice(&staged[..n]);

        if !self.peek {
            self.inbound = None;
        }

        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.test_mode {
            self.test_written += buf.len();
            return Ok(buf.len());
        }

        let Some(transport) = self.transport.as_ref() else {
            return Err(io::ErrorKind::NotConnected.into());
        };

        let result = if transport.state() == LinkState::Connected {
            transport.send(buf)
        } else if let Some(peer) = self.peer_addr() {
            transport.send_to(buf, peer)
        } else {
            Err(io::ErrorKind::NotConnected.into())
        };

        match result {
            Err(e) if is_message_too_large(&e) => {
                debug!("Datagram of {} bytes exceeds path MTU", buf.len());
                self.mtu_exceeded = true;
                Err(io::ErrorKind::WouldBlock.into())
            }
            r => r,
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        // While listening the transport is unconnected and the peer is
        // whoever sent the datagram being processed.
        self.link_peer().or(self.inbound_from)
    }

    fn mtu(&self) -> Option<usize> {
        Some(self.link_mtu.saturating_sub(self.mtu_overhead()))
    }

    fn mtu_overhead(&self) -> usize {
        if self.is_ipv6() {
            IPV6_OVERHEAD
        } else {
            IPV4_OVERHEAD
        }
    }

    fn fallback_mtu(&self) -> Option<usize> {
        if self.is_ipv6() {
            Some(IPV6_MIN_MTU - IPV6_OVERHEAD)
        } else {
            Some(IPV4_MIN_MTU - IPV4_OVERHEAD)
        }
    }

    fn set_retransmit_deadline(&mut self, at: Option<Instant>) {
        self.retransmit_deadline = at;
    }

    fn retransmit_deadline(&self) -> Option<Instant> {
        self.retransmit_deadline
    }

    fn generate_cookie(&mut self) -> Option<Vec<u8>> {
        let peer = self.peer_addr()?;
        let secret = self.cookie_secret.as_ref()?;
        match secret.cookie(peer) {
            Ok(c) => Some(c.to_vec()),
            Err(e) => {
                warn!("Failed to generate cookie: {}", e);
                None
            }
        }
    }

    fn verify_cookie(&self, cookie: &[u8]) -> bool {
        match (self.peer_addr(), self.cookie_secret.as_ref()) {
            (Some(peer), Some(secret)) => secret.verify(peer, cookie),
            _ => false,
        }
    }

    fn set_peek(&mut self, peek: bool) {
        self.peek = peek;
    }

    fn take_mtu_exceeded(&mut self) -> bool {
        std::mem::take(&mut self.mtu_exceeded)
    }
}
