//! ssh-exec - Entry point
//!
//! Parses CLI arguments, runs one command on the remote host with the local
//! process's stdio attached, and exits with the remote exit code.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ssh_exec::config::{Args, Config};
use ssh_exec::error::{Result, SshExecError};
use ssh_exec::ssh::{load_keys, Client};

/// Exit code for local, connection and signal failures
const FAILURE_EXIT_CODE: u8 = 255;

fn main() -> ExitCode {
    // Logs go to stderr so stdout carries only remote output
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            return ExitCode::from(FAILURE_EXIT_CODE);
        }
    };

    let result = runtime.block_on(run(args));

    // A pending read of the local stdin cannot be cancelled; do not wait for it
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = exit_code(&e);
            if code == FAILURE_EXIT_CODE {
                error!("{}", e);
            } else {
                debug!("{}", e);
            }
            ExitCode::from(code)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::from_args(args)?;

    let client = if config.identities.is_empty() {
        Client::default()
    } else {
        Client::with_credentials(load_keys(&config.identities)?)
    };

    let mut cmd = client.command(&config.destination, &config.command, Some(&config.options));
    info!("ssh-exec v{} running on {}", env!("CARGO_PKG_VERSION"), cmd.addr());

    cmd.set_stdio(
        Some(Box::new(tokio::io::stdin())),
        Some(Box::new(tokio::io::stdout())),
        Some(Box::new(tokio::io::stderr())),
    );

    let Some(timeout_ms) = config.timeout_ms else {
        return cmd.run().await;
    };

    let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), cmd.run()).await;
    match outcome {
        Ok(result) => result,
        Err(_) => {
            cmd.close().await;
            Err(SshExecError::Timeout(timeout_ms))
        }
    }
}

/// Remote exit codes pass through; everything else is 255
fn exit_code(err: &SshExecError) -> u8 {
    match err.exit_status().and_then(|status| status.code()) {
        Some(code) => u8::try_from(code).unwrap_or(FAILURE_EXIT_CODE),
        None => FAILURE_EXIT_CODE,
    }
}
