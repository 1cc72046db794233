//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

/// Process-wide server options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// How long a hub keeps its upstream connection after the last
    /// subscriber leaves
    pub idle_grace: Duration,

    /// Trust proxy-supplied client address headers
    pub trusted_proxy: bool,

    /// Header consulted first for the client address when trusting a
    /// proxy; `X-Forwarded-For` is the fallback
    pub client_header: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("valid default bind addr"),
            idle_grace: Duration::from_secs(60),
            trusted_proxy: false,
            client_header: None,
        }
    }
}

impl ServerConfig {
    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the idle grace duration
    pub fn idle_grace(mut self, grace: Duration) -> Self {
        self.idle_grace = grace;
        self
    }

    /// Trust proxy headers for client addresses
    pub fn trusted_proxy(mut self, trusted: bool) -> Self {
        self.trusted_proxy = trusted;
        self
    }

    /// Set the preferred client address header
    pub fn client_header(mut self, header: impl Into<String>) -> Self {
        self.client_header = Some(header.into());
        self
    }
}
