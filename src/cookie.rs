use std::fmt;
use std::net::SocketAddr;

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length of generated cookies.
pub const COOKIE_LEN: usize = 32;

/// Secret keying the stateless listen cookies of a server context.
///
/// A cookie is `HMAC-SHA256(secret, peer address || peer port)`. It proves
/// the client can receive at the address it claims without the server
/// keeping per-client state.
pub struct CookieSecret {
    key: Zeroizing<[u8; 32]>,
}

impl CookieSecret {
    /// Create a secret from the operating system's random source.
    pub fn generate() -> Result<Self, Error> {
        let mut key = Zeroizing::new([0u8; 32]);
        OsRng
            .try_fill_bytes(&mut key[..])
            .map_err(|e| Error::Config(format!("cookie secret: {}", e)))?;
        Ok(CookieSecret { key })
    }

    /// Create a secret from known bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        CookieSecret {
            key: Zeroizing::new(bytes),
        }
    }

    /// The cookie for `peer`.
    pub fn cookie(&self, peer: SocketAddr) -> Result<[u8; COOKIE_LEN], Error> {
        let tag = self.mac(peer)?.finalize().into_bytes();
        let mut cookie = [0u8; COOKIE_LEN];
        cookie.copy_from_slice(&tag[..COOKIE_LEN]);
        Ok(cookie)
    }

    /// Constant time check of a cookie echoed by `peer`.
    pub fn verify(&self, peer: SocketAddr, cookie: &[u8]) -> bool {
        if cookie.len() != COOKIE_LEN {
            return false;
        }
        match self.mac(peer) {
            Ok(mac) => mac.verify_slice(cookie).is_ok(),
            Err(_) => false,
        }
    }

    fn mac(&self, peer: SocketAddr) -> Result<HmacSha256, Error> {
        let mut mac = HmacSha256::new_from_slice(&self.key[..])
            .map_err(|_| Error::Config("Invalid HMAC key".to_string()))?;
        match peer {
            SocketAddr::V4(a) => mac.update(&a.ip().octets()),
            SocketAddr::V6(a) => mac.update(&a.ip().octets()),
        }
        mac.update(&peer.port().to_be_bytes());
        Ok(mac)
    }
}

impl fmt::Debug for CookieSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieSecret").finish_non_exhaustive()
    }
}
