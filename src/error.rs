//! Error types for the SSH command client

use std::fmt;

use thiserror::Error;

/// How a remote command finished, when it did not finish cleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    /// The command exited with the given code
    Code(u32),

    /// The command was terminated by a signal
    Signal {
        name: String,
        core_dumped: bool,
        message: String,
    },

    /// The channel closed without the server reporting an exit status
    Missing,
}

impl ExitStatus {
    /// True only for a zero exit code
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }

    /// The numeric exit code, if the command exited normally
    pub fn code(&self) -> Option<u32> {
        match self {
            ExitStatus::Code(code) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit status {}", code),
            ExitStatus::Signal {
                name,
                core_dumped,
                message,
            } => {
                write!(f, "signal {}", name)?;
                if *core_dumped {
                    f.write_str(" (core dumped)")?;
                }
                if !message.is_empty() {
                    write!(f, ": {}", message)?;
                }
                Ok(())
            }
            ExitStatus::Missing => f.write_str("remote command exited without exit status"),
        }
    }
}

/// Main error type for the SSH command client
#[derive(Debug, Error)]
pub enum SshExecError {
    /// No signing keys were supplied and no default keys could be loaded
    #[error("no private keys available")]
    NoCredentials,

    /// The byte stream to the server (TCP or proxy command) could not be set up
    #[error("failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// SSH protocol handshake failed
    #[error("SSH handshake failed: {0}")]
    Handshake(String),

    /// The server rejected every offered key
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The session channel could not be opened or driven
    #[error("SSH session error: {0}")]
    Session(String),

    /// Wait or Kill called without a live session
    #[error("command has not been started")]
    NotStarted,

    /// The handle was closed and cannot be reused
    #[error("command handle is closed")]
    Closed,

    /// The remote command exited non-zero or was signaled
    #[error("remote command failed: {0}")]
    Remote(ExitStatus),

    /// Operation deliberately not implemented by this client
    #[error("{0}")]
    Unsupported(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// SSH key loading error
    #[error("SSH key error: {0}")]
    SshKey(String),

    /// A caller-imposed deadline elapsed
    #[error("Command timeout after {0}ms")]
    Timeout(u64),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using SshExecError
pub type Result<T> = std::result::Result<T, SshExecError>;

impl SshExecError {
    /// Create a dial error for the given address
    pub fn dial(addr: impl Into<String>, source: std::io::Error) -> Self {
        SshExecError::Dial {
            addr: addr.into(),
            source,
        }
    }

    /// Create a handshake error from a string
    pub fn handshake(msg: impl Into<String>) -> Self {
        SshExecError::Handshake(msg.into())
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        SshExecError::Authentication(msg.into())
    }

    /// Create a session error from a string
    pub fn session(msg: impl Into<String>) -> Self {
        SshExecError::Session(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        SshExecError::Config(msg.into())
    }

    /// The remote exit status carried by this error, if any
    pub fn exit_status(&self) -> Option<&ExitStatus> {
        match self {
            SshExecError::Remote(status) => Some(status),
            _ => None,
        }
    }
}
