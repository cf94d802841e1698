//! Session establishment
//!
//! Dials the server (directly or through a proxy command), runs the SSH
//! handshake over the resulting byte stream, authenticates with public keys
//! and opens one session channel. Any failure tears down whatever was
//! already set up before the error is returned; nothing is retried.

use std::sync::Arc;

use russh::client::{self, Handle, Msg};
use russh::keys::PrivateKeyWithHashAlg;
use russh::{Channel, Disconnect};
use tracing::{debug, error, info};

use super::handler::SshHandler;
use super::keys::CredentialSet;
use super::tunnel::{self, join_host_port};
use crate::error::{Result, SshExecError};

/// Where and as whom to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Remote user; empty means the invoking local account
    pub user: String,
    pub host: String,
    pub port: u16,
    /// Proxy command template (unsubstituted)
    pub proxy_command: Vec<String>,
}

impl Target {
    /// `host:port`
    pub fn addr(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

/// An authenticated connection with one open session channel
pub struct Connection {
    pub(crate) handle: Handle<SshHandler>,
    pub(crate) channel: Channel<Msg>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &"<russh::Handle>")
            .field("channel", &self.channel.id())
            .finish()
    }
}

/// Connect to `target`, authenticate with `credentials` and open a session
pub async fn establish(target: &Target, credentials: &CredentialSet) -> Result<Connection> {
    if credentials.is_empty() {
        return Err(SshExecError::NoCredentials);
    }

    let user = if target.user.is_empty() {
        current_username()?
    } else {
        target.user.clone()
    };
    let addr = target.addr();

    info!("Connecting to {}@{}...", user, addr);

    let stream = tunnel::dial(&target.host, target.port, &user, &target.proxy_command).await?;

    let config = Arc::new(client::Config::default());
    let mut handle = client::connect_stream(config, stream, SshHandler::new(addr.as_str()))
        .await
        .map_err(|e| {
            error!("SSH handshake with {} failed: {}", addr, e);
            SshExecError::handshake(e.to_string())
        })?;

    if let Err(e) = authenticate(&mut handle, &user, credentials).await {
        error!("Authentication as {} on {} failed: {}", user, addr, e);
        disconnect(&handle).await;
        return Err(e);
    }

    let channel = match handle.channel_open_session().await {
        Ok(channel) => channel,
        Err(e) => {
            error!("Failed to open session on {}: {}", addr, e);
            disconnect(&handle).await;
            return Err(SshExecError::session(format!("failed to open channel: {}", e)));
        }
    };

    debug!("Session channel {:?} open on {}", channel.id(), addr);
    Ok(Connection { handle, channel })
}

/// Offer every key in order; the first accepted key wins
async fn authenticate(
    handle: &mut Handle<SshHandler>,
    user: &str,
    credentials: &CredentialSet,
) -> Result<()> {
    let hash_alg = handle
        .best_supported_rsa_hash()
        .await
        .map_err(|e| SshExecError::auth(e.to_string()))?
        .flatten();

    for (index, key) in credentials.iter().enumerate() {
        debug!(
            "Offering key {} ({}) for user '{}'",
            index,
            key.algorithm(),
            user
        );

        let result = handle
            .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg))
            .await
            .map_err(|e| SshExecError::auth(e.to_string()))?;

        if result.success() {
            info!("Key authentication successful");
            return Ok(());
        }
    }

    Err(SshExecError::auth(format!(
        "server rejected all {} offered key(s) for user '{}'",
        credentials.len(),
        user
    )))
}

/// Best-effort disconnect of an established connection
pub(crate) async fn disconnect(handle: &Handle<SshHandler>) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "en")
        .await
    {
        debug!("Disconnect failed: {}", e);
    }
}

/// Name of the invoking local account
fn current_username() -> Result<String> {
    ["USER", "USERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|name| !name.is_empty())
        .ok_or_else(|| SshExecError::config("getting current user: USER is not set"))
}
