//! Connection options
//!
//! Per-command connection parameters: port override and proxy command.

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Connection options for a single remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    /// Port override (default: taken from the host string, else 22)
    pub port: Option<u16>,

    /// Proxy command argv template; `%h`, `%p` and `%r` are substituted
    /// with host, port and remote user before the process is spawned
    pub proxy_command: Vec<String>,
}

impl Options {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Tunnel the connection through an external command
    pub fn with_proxy_command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.proxy_command = argv.into_iter().map(Into::into).collect();
        self
    }
}
