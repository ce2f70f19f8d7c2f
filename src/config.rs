use std::time::Duration;

use crate::Error;

/// Smallest link MTU an IPv4 host must accept (RFC 791).
const MIN_LINK_MTU: usize = 576;

/// Socket configuration
#[derive(Debug, Clone)]
pub struct Config {
    read_chunk_size: usize,
    link_mtu: usize,
    handshake_timeout: Duration,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            read_chunk_size: 4096,
            link_mtu: 1500,
            handshake_timeout: Duration::from_secs(40),
        }
    }

    /// Size of the plaintext read buffer.
    ///
    /// A stream socket holds at most one chunk of this size, and every
    /// decrypted datagram is read into a fresh buffer of this size.
    #[inline(always)]
    pub fn read_chunk_size(&self) -> usize {
        self.read_chunk_size
    }

    /// Assumed link MTU.
    ///
    /// The MTU reported to the engine is this value minus the IP/UDP
    /// header overhead for the peer's address family.
    #[inline(always)]
    pub fn link_mtu(&self) -> usize {
        self.link_mtu
    }

    /// Timeout for the entire handshake, regardless of retransmissions.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }
}

/// Builder for socket configuration.
pub struct ConfigBuilder {
    read_chunk_size: usize,
    link_mtu: usize,
    handshake_timeout: Duration,
}

impl ConfigBuilder {
    /// Set the size of the plaintext read buffer.
    ///
    /// Defaults to 4096, one page.
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    /// Set the assumed link MTU.
    ///
    /// Path MTU discovery is not attempted. Defaults to 1500.
    pub fn link_mtu(mut self, mtu: usize) -> Self {
        self.link_mtu = mtu;
        self
    }

    /// Set the timeout for the entire handshake.
    ///
    /// Defaults to 40 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::Config` if a value is out of range.
    pub fn build(self) -> Result<Config, Error> {
        if self.read_chunk_size == 0 {
            return Err(Error::Config("read_chunk_size must be non-zero".into()));
        }

        if self.link_mtu < MIN_LINK_MTU {
            return Err(Error::Config(format!(
                "link_mtu {} is below the minimum of {}",
                self.link_mtu, MIN_LINK_MTU
            )));
        }

        if self.handshake_timeout.is_zero() {
            return Err(Error::Config("handshake_timeout must be non-zero".into()));
        }

        Ok(Config {
            read_chunk_size: self.read_chunk_size,
            link_mtu: self.link_mtu,
            handshake_timeout: self.handshake_timeout,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            read_chunk_size: 4096,
            link_mtu: 1500,
            handshake_timeout: Duration::from_secs(40),
        }
    }
}
