//! Runtime configuration

use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Token lifetimes
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl AuthConfig {
    pub fn access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    pub fn refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
        }
    }
}

/// Live connection settings
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// How long a fresh channel may stay unauthenticated
    pub auth_timeout: Duration,
    /// Per-connection outbound queue; a full queue closes the connection
    pub outbound_buffer: usize,
}

impl RouterConfig {
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn outbound_buffer(mut self, capacity: usize) -> Self {
        self.outbound_buffer = capacity.max(1);
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

/// Everything the server binary needs
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Token signing secret, at least 32 bytes
    pub token_secret: Vec<u8>,
    /// Postgres URL; in-memory stores are used when absent
    pub database_url: Option<String>,
    pub auth: AuthConfig,
    pub router: RouterConfig,
}
