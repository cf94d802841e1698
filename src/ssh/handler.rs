//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait to handle SSH connection events.

use russh::keys::HashAlg;
use tracing::debug;

/// SSH client handler for russh
///
/// Accepts every server host key; the SHA-256 fingerprint is logged at
/// debug level.
#[derive(Debug, Clone)]
pub struct SshHandler {
    addr: String,
}

impl SshHandler {
    /// Create a handler for the given `host:port` address
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Address this handler is connected to
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl russh::client::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "Server {} presented host key {}",
            self.addr,
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}
