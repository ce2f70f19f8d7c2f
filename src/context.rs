use std::sync::Arc;

use crate::config::Config;
use crate::cookie::CookieSecret;
use crate::engine::{Engine, Role, TransportKind};
use crate::Error;

/// Shared settings for sockets of one role.
///
/// A server context carries the cookie secret used by the stateless DTLS
/// listen. It is created explicitly with the context instead of lazily on
/// first use.
pub struct Context<E> {
    engine: E,
    role: Role,
    config: Arc<Config>,
    cookie_secret: Option<Arc<CookieSecret>>,
}

impl<E: Engine> Context<E> {
    /// A context for sockets initiating the handshake.
    pub fn client(engine: E, config: Config) -> Self {
        Context {
            engine,
            role: Role::Client,
            config: Arc::new(config),
            cookie_secret: None,
        }
    }

    /// A context for sockets accepting handshakes.
    ///
    /// Generates a fresh cookie secret from the operating system.
    pub fn server(engine: E, config: Config) -> Result<Self, Error> {
        let secret = CookieSecret::generate()?;
        Ok(Context {
            engine,
            role: Role::Server,
            config: Arc::new(config),
            cookie_secret: Some(Arc::new(secret)),
        })
    }

    /// Replace the cookie secret.
    ///
    /// Servers sharing a port through several processes must share the
    /// secret for cookies to verify.
    pub fn with_cookie_secret(mut self, secret: CookieSecret) -> Self {
        self.cookie_secret = Some(Arc::new(secret));
        self
    }

    #[inline(always)]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline(always)]
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn cookie_secret(&self) -> Option<&Arc<CookieSecret>> {
        self.cookie_secret.as_ref()
    }

    pub(crate) fn new_session(&self, kind: TransportKind) -> Result<E::Session, Error> {
        Ok(self.engine.new_session(self.role, kind)?)
    }
}
