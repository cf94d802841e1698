//! ssh-exec - run commands on remote hosts over SSH
//!
//! This crate runs one non-interactive command per SSH connection and
//! exposes it through a handle shaped like a local child process: start,
//! wait, kill, and pipes for stdin, stdout and stderr.
//!
//! # Features
//!
//! - Public-key authentication, offering every configured key in order
//! - Direct TCP connections or tunnels through a proxy command
//!   (`%h`, `%p` and `%r` are substituted)
//! - Lazy connection on first use, torn down exactly once
//! - `ssh-exec` command line binary
//!
//! # Example
//!
//! ```no_run
//! use ssh_exec::{Client, Options};
//!
//! # async fn run() -> ssh_exec::Result<()> {
//! let keys = ssh_exec::load_keys(&["/home/alice/.ssh/id_ed25519"])?;
//! let client = Client::with_credentials(keys);
//! let options = Options::new().with_port(2222);
//! let mut cmd = client.command("alice@db.example", &["uptime"], Some(&options));
//! let output = cmd.output().await?;
//! println!("{}", output.stdout);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ssh;

// Re-exports for convenience
pub use config::{Args, Config};
pub use error::{ExitStatus, Result, SshExecError};
pub use ssh::{
    client_keys, command_string, load_keys, ChildStderr, ChildStdin, ChildStdout, Client,
    CommandOutput, CredentialSet, Options, RemoteCommand,
};
