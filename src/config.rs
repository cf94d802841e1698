//! Configuration and CLI argument parsing for ssh-exec

use clap::Parser;
use std::path::PathBuf;

use crate::error::{Result, SshExecError};
use crate::ssh::Options;

/// Default timeout in milliseconds (0 = wait forever)
pub const DEFAULT_TIMEOUT_MS: u64 = 0;

/// ssh-exec CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "ssh-exec")]
#[command(version)]
#[command(about = "Run a command on a remote host over SSH with public-key authentication")]
pub struct Args {
    /// Remote host as [user@]host[:port]
    #[arg(env = "SSH_EXEC_HOST")]
    pub destination: String,

    /// Command and arguments to run; a login shell when omitted
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// SSH port (overrides a port given in the destination)
    #[arg(short, long, env = "SSH_EXEC_PORT")]
    pub port: Option<u16>,

    /// Proxy command, split on whitespace; %h, %p and %r are substituted
    #[arg(long, env = "SSH_EXEC_PROXY_COMMAND")]
    pub proxy_command: Option<String>,

    /// Private key file to offer (repeatable); defaults to ~/.ssh keys
    #[arg(short, long = "identity", env = "SSH_EXEC_IDENTITY", value_delimiter = ',')]
    pub identity: Vec<PathBuf>,

    /// Timeout for the whole command in milliseconds (0 = none)
    #[arg(long, default_value = "0", env = "SSH_EXEC_TIMEOUT")]
    pub timeout: u64,
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Remote host as [user@]host[:port]
    pub destination: String,

    /// Remote command argv
    pub command: Vec<String>,

    /// Connection options
    pub options: Options,

    /// Explicit key files
    pub identities: Vec<PathBuf>,

    /// Command timeout in milliseconds (None = unlimited)
    pub timeout_ms: Option<u64>,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        let mut options = Options::new();
        if let Some(port) = args.port {
            options = options.with_port(port);
        }
        if let Some(proxy) = args.proxy_command.as_deref() {
            options = options.with_proxy_command(split_proxy_command(proxy));
        }

        Ok(Config {
            destination: args.destination,
            command: args.command,
            options,
            identities: args.identity,
            timeout_ms: parse_timeout(args.timeout),
        })
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    let host = args
        .destination
        .split_once('@')
        .map_or(args.destination.as_str(), |(_, host)| host);
    if host.is_empty() {
        errors.push("Missing remote host".to_string());
    }

    if args.port == Some(0) {
        errors.push("--port must be between 1 and 65535".to_string());
    }

    if let Some(ref proxy) = args.proxy_command {
        if proxy.trim().is_empty() {
            errors.push("--proxy-command must not be empty".to_string());
        }
    }

    for key_path in &args.identity {
        if !key_path.exists() {
            errors.push(format!("SSH key file not found: {}", key_path.display()));
        }
    }

    if !errors.is_empty() {
        return Err(SshExecError::config(errors.join("\n")));
    }

    Ok(())
}

/// Split a proxy command line into its argv template
pub fn split_proxy_command(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

/// Map a timeout argument to an optional deadline; 0 disables it
pub fn parse_timeout(ms: u64) -> Option<u64> {
    (ms > 0).then_some(ms)
}
