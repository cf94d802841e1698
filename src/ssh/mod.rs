//! SSH remote command execution
//!
//! This module connects to SSH servers (directly or through a proxy
//! command), authenticates with public keys and runs one command per
//! connection behind a process-like handle.

pub mod client;
pub mod command;
pub mod connection;
pub mod handler;
pub mod keys;
pub mod options;
pub mod sanitize;
pub mod stdio;
pub mod tunnel;

// Re-exports
pub use client::Client;
pub use command::{CommandOutput, RemoteCommand};
pub use connection::{Connection, Target};
pub use handler::SshHandler;
pub use keys::{client_keys, load_keys, CredentialSet};
pub use options::{Options, DEFAULT_PORT};
pub use sanitize::command_string;
pub use stdio::{BoxedReader, BoxedWriter, ChildStderr, ChildStdin, ChildStdout};
pub use tunnel::{expand_proxy_command, Tunnel};
