//! SSH client
//!
//! A [`Client`] binds a set of signing keys and hands out one
//! [`RemoteCommand`] per remote invocation. Building a command does no I/O;
//! the connection is made when the command first needs it.

use russh::keys::PrivateKey;
use tracing::trace;

use super::command::{DefaultKeys, RemoteCommand};
use super::connection::Target;
use super::keys::{self, CredentialSet};
use super::options::Options;
use super::sanitize::{command_string, resolve_port, split_host_port, split_user_host};
use crate::error::{Result, SshExecError};

/// Runs commands on remote hosts with public-key authentication
#[derive(Debug, Clone)]
pub struct Client {
    credentials: CredentialSet,
    default_keys: Option<DefaultKeys>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Client {
    /// Create a client offering `keys`
    ///
    /// With no keys, connections fall back to [`keys::client_keys`].
    pub fn new(keys: impl IntoIterator<Item = PrivateKey>) -> Self {
        Self {
            credentials: keys.into_iter().collect(),
            default_keys: Some(keys::client_keys),
        }
    }

    /// Create a client from an already built credential set
    pub fn with_credentials(credentials: CredentialSet) -> Self {
        Self {
            credentials,
            default_keys: Some(keys::client_keys),
        }
    }

    /// Never fall back to the default keys
    pub fn without_default_keys(mut self) -> Self {
        self.default_keys = None;
        self
    }

    pub fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }

    /// Build a handle that runs `argv` on `host` (`[user@]host[:port]`)
    ///
    /// An empty `argv` requests a login shell.
    pub fn command<S: AsRef<str>>(
        &self,
        host: &str,
        argv: &[S],
        options: Option<&Options>,
    ) -> RemoteCommand {
        let (user, host) = split_user_host(host);
        let (host, host_port) = split_host_port(host);
        let port = resolve_port(options.and_then(|o| o.port), host_port);
        let proxy_command = options
            .map(|o| o.proxy_command.clone())
            .unwrap_or_default();
        let command = command_string(argv);

        let destination = if user.is_empty() {
            host.to_string()
        } else {
            format!("{}@{}", user, host)
        };
        trace!(
            "running (equivalent of): ssh \"{}\" -p {} '{}'",
            destination,
            port,
            command
        );

        let target = Target {
            user: user.to_string(),
            host: host.to_string(),
            port,
            proxy_command,
        };

        RemoteCommand::new(
            target,
            command,
            self.credentials.clone(),
            self.default_keys,
        )
    }

    /// Copy files to or from a remote host
    ///
    /// Not implemented by this client; always fails with
    /// [`SshExecError::Unsupported`].
    pub fn copy<S: AsRef<str>>(&self, args: &[S], _options: Option<&Options>) -> Result<()> {
        trace!("copy requested with {} argument(s)", args.len());
        Err(SshExecError::Unsupported(
            "scp command is not implemented (OpenSSH scp not available)".to_string(),
        ))
    }
}
