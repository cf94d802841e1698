//! Remote command handle
//!
//! [`RemoteCommand`] gives an SSH session channel the lifecycle of a local
//! child process: `start`, `wait`, `kill`, stdio pipes and `close`. The
//! connection is established lazily by the first call that needs it, at
//! most once per handle.
//!
//! States: `Idle` (no connection) → `Connected` (channel open, then
//! running) → `Closed` (terminal).

use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg, ChannelReadHalf, ChannelWriteHalf, Sig};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use super::connection::{self, Target};
use super::handler::SshHandler;
use super::keys::CredentialSet;
use super::stdio::{
    self, BoxedReader, BoxedWriter, ChildStderr, ChildStdin, ChildStdout, SharedBuffer, Sink,
};
use crate::error::{ExitStatus, Result, SshExecError};

/// Process-wide fallback key source
pub type DefaultKeys = fn() -> CredentialSet;

/// Output captured by [`RemoteCommand::output`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,

    /// Standard error from the command
    pub stderr: String,

    /// How the command finished
    pub status: ExitStatus,
}

impl CommandOutput {
    /// Check if the command exited with status 0
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

enum State {
    Idle,
    Connected(LiveSession),
    Closed,
}

/// The connection owned by a handle; exactly one of `opened`/`running` is
/// set until the command has been waited for
struct LiveSession {
    handle: Handle<SshHandler>,
    opened: Option<Opened>,
    running: Option<Running>,
}

/// Channel open, no request sent yet
struct Opened {
    channel: Channel<Msg>,
    stdin: Option<BoxedReader>,
    pump: Pump,
}

/// Command accepted by the remote
///
/// The read half of the channel lives in the driver task; requests such as
/// signals go out through the write half without waiting on the driver.
struct Running {
    writer: ChannelWriteHalf<Msg>,
    driver: JoinHandle<Result<()>>,
    stdin_pump: Option<JoinHandle<()>>,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.driver.abort();
        if let Some(pump) = &self.stdin_pump {
            pump.abort();
        }
    }
}

/// Routes channel messages to the output sinks and records the exit status
struct Pump {
    stdout: Sink,
    stderr: Sink,
    status: Option<ExitStatus>,
}

impl Pump {
    fn new(stdout: Option<BoxedWriter>, stderr: Option<BoxedWriter>) -> Self {
        Self {
            stdout: Sink::new("stdout", stdout),
            stderr: Sink::new("stderr", stderr),
            status: None,
        }
    }

    /// Returns false once the channel is closed
    async fn dispatch(&mut self, msg: ChannelMsg) -> bool {
        match msg {
            ChannelMsg::Data { data } => self.stdout.write(&data).await,
            ChannelMsg::ExtendedData { data, ext } => {
                // ext == 1 is stderr
                if ext == 1 {
                    self.stderr.write(&data).await;
                } else {
                    debug!("Ignoring extended data stream {}", ext);
                }
            }
            ChannelMsg::ExitStatus { exit_status } => {
                self.status = Some(ExitStatus::Code(exit_status));
            }
            ChannelMsg::ExitSignal {
                signal_name,
                core_dumped,
                error_message,
                ..
            } => {
                self.status = Some(ExitStatus::Signal {
                    name: signal_name_of(signal_name),
                    core_dumped,
                    message: error_message,
                });
            }
            ChannelMsg::Eof => trace!("Remote sent EOF"),
            ChannelMsg::Close => return false,
            _ => {}
        }
        true
    }

    async fn finish(mut self) -> Result<()> {
        self.stdout.finish().await;
        self.stderr.finish().await;

        match self.status {
            Some(ExitStatus::Code(0)) => Ok(()),
            Some(status) => Err(SshExecError::Remote(status)),
            None => Err(SshExecError::Remote(ExitStatus::Missing)),
        }
    }
}

/// Protocol name of a signal (`KILL`, `TERM`, or a custom name as sent)
fn signal_name_of(sig: Sig) -> String {
    match sig {
        Sig::Custom(name) => name,
        named => format!("{:?}", named),
    }
}

impl Opened {
    /// Send the exec (or shell) request and wait for the remote's answer
    async fn request(&mut self, command: &str) -> Result<()> {
        let (kind, sent) = if command.is_empty() {
            ("shell", self.channel.request_shell(true).await)
        } else {
            ("exec", self.channel.exec(true, command).await)
        };
        sent.map_err(|e| SshExecError::session(format!("failed to send {} request: {}", kind, e)))?;

        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Success) => return Ok(()),
                Some(ChannelMsg::Failure) => {
                    return Err(SshExecError::session(format!(
                        "remote refused {} request",
                        kind
                    )))
                }
                Some(msg) => {
                    if !self.pump.dispatch(msg).await {
                        return Err(SshExecError::session(format!(
                            "channel closed before {} request was accepted",
                            kind
                        )));
                    }
                }
                None => {
                    return Err(SshExecError::session(format!(
                        "connection closed before {} request was accepted",
                        kind
                    )))
                }
            }
        }
    }

    /// Hand the channel to background tasks
    async fn spawn(self) -> Running {
        let Opened {
            channel,
            stdin,
            pump,
        } = self;

        let (reader, writer) = channel.split();

        let stdin_pump = match stdin {
            Some(mut source) => {
                let mut stdin = Box::pin(writer.make_writer());
                Some(tokio::spawn(async move {
                    match tokio::io::copy(&mut source, &mut stdin).await {
                        Ok(n) => trace!("Copied {} bytes to remote stdin", n),
                        Err(e) => debug!("Remote stdin closed: {}", e),
                    }
                    let _ = stdin.shutdown().await;
                }))
            }
            None => {
                if let Err(e) = writer.eof().await {
                    debug!("Failed to send EOF on stdin: {}", e);
                }
                None
            }
        };

        let driver = tokio::spawn(drive(reader, pump));

        Running {
            writer,
            driver,
            stdin_pump,
        }
    }
}

/// Pump channel messages until the remote closes the channel
async fn drive(mut reader: ChannelReadHalf, mut pump: Pump) -> Result<()> {
    while let Some(msg) = reader.wait().await {
        if !pump.dispatch(msg).await {
            break;
        }
    }

    pump.finish().await
}

fn signal_sent(result: std::result::Result<(), russh::Error>) -> Result<()> {
    result.map_err(|e| SshExecError::session(format!("failed to send signal: {}", e)))
}

impl LiveSession {
    async fn shutdown(mut self) {
        if let Some(opened) = self.opened.take() {
            let _ = opened.channel.close().await;
        }
        if let Some(running) = self.running.take() {
            let _ = running.writer.close().await;
            // dropping Running aborts its tasks
        }
        connection::disconnect(&self.handle).await;
    }
}

/// A command to run on a remote host over its own SSH connection
///
/// Created inert by [`Client::command`](super::client::Client::command).
/// Lifecycle methods take `&mut self`: one handle drives one command from
/// one task. Use separate handles for concurrent commands.
pub struct RemoteCommand {
    target: Target,
    command: String,
    credentials: CredentialSet,
    default_keys: Option<DefaultKeys>,
    stdin: Option<BoxedReader>,
    stdout: Option<BoxedWriter>,
    stderr: Option<BoxedWriter>,
    state: State,
}

impl RemoteCommand {
    pub(crate) fn new(
        target: Target,
        command: String,
        credentials: CredentialSet,
        default_keys: Option<DefaultKeys>,
    ) -> Self {
        Self {
            target,
            command,
            credentials,
            default_keys,
            stdin: None,
            stdout: None,
            stderr: None,
            state: State::Idle,
        }
    }

    /// Remote user as given in the host string (empty: local account name)
    pub fn user(&self) -> &str {
        &self.target.user
    }

    pub fn host(&self) -> &str {
        &self.target.host
    }

    pub fn port(&self) -> u16 {
        self.target.port
    }

    /// `host:port`
    pub fn addr(&self) -> String {
        self.target.addr()
    }

    /// Command string sent in the exec request; empty for a shell
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Proxy command template, before token substitution
    pub fn proxy_command(&self) -> &[String] {
        &self.target.proxy_command
    }

    /// True once the remote accepted the command
    pub fn is_started(&self) -> bool {
        matches!(&self.state, State::Connected(live) if live.opened.is_none())
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Redirect the remote command's standard streams
    ///
    /// Must be called before the session is established; the values are
    /// attached to the session when it is opened.
    pub fn set_stdio(
        &mut self,
        stdin: Option<BoxedReader>,
        stdout: Option<BoxedWriter>,
        stderr: Option<BoxedWriter>,
    ) {
        if !matches!(self.state, State::Idle) {
            warn!(
                "stdio set on `{}` after the session was established; the open session keeps its streams",
                self.command
            );
        }
        self.stdin = stdin;
        self.stdout = stdout;
        self.stderr = stderr;
    }

    /// Start the command (or a shell, for an empty command) without waiting
    /// for it to finish
    pub async fn start(&mut self) -> Result<()> {
        let command = self.command.clone();
        let addr = self.target.addr();
        let live = self.ensure_session().await?;
        let Some(mut opened) = live.opened.take() else {
            return Err(SshExecError::session("command already started"));
        };

        if let Err(e) = opened.request(&command).await {
            error!("Failed to start `{}` on {}: {}", command, addr, e);
            live.opened = Some(opened);
            self.close().await;
            return Err(e);
        }

        debug!("Started `{}` on {}", command, addr);
        live.running = Some(opened.spawn().await);
        Ok(())
    }

    /// Wait for the remote command to finish, then close the connection
    ///
    /// A non-zero exit status or a signal is returned as
    /// [`SshExecError::Remote`]. The connection is closed whatever the
    /// outcome.
    pub async fn wait(&mut self) -> Result<()> {
        let running = match &mut self.state {
            State::Connected(live) => live.running.take(),
            State::Idle | State::Closed => return Err(SshExecError::NotStarted),
        };

        let result = match running {
            Some(mut running) => match (&mut running.driver).await {
                Ok(result) => result,
                Err(e) => Err(SshExecError::session(format!("channel driver failed: {}", e))),
            },
            None => Err(SshExecError::NotStarted),
        };

        if let Err(e) = &result {
            debug!("`{}` on {} failed: {}", self.command, self.target.addr(), e);
        }

        self.close().await;
        result
    }

    /// Send SIGKILL to the remote command
    pub async fn kill(&mut self) -> Result<()> {
        let State::Connected(live) = &self.state else {
            return Err(SshExecError::NotStarted);
        };

        if let Some(running) = &live.running {
            return signal_sent(running.writer.signal(Sig::KILL).await);
        }

        if let Some(opened) = &live.opened {
            return signal_sent(opened.channel.signal(Sig::KILL).await);
        }

        Err(SshExecError::NotStarted)
    }

    /// Close the channel and the connection; safe to call repeatedly
    pub async fn close(&mut self) {
        if let State::Connected(live) = std::mem::replace(&mut self.state, State::Closed) {
            debug!("Closing session to {}", self.target.addr());
            live.shutdown().await;
        }
    }

    /// Start the command and wait for it to finish
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        self.wait().await
    }

    /// Run the command, capturing stdout and stderr
    ///
    /// A remote non-zero exit is reported in [`CommandOutput::status`];
    /// only connection and protocol failures are returned as errors.
    pub async fn output(&mut self) -> Result<CommandOutput> {
        if !matches!(self.state, State::Idle) {
            return Err(SshExecError::session(
                "output requested after the session was established",
            ));
        }

        let stdout = SharedBuffer::default();
        let stderr = SharedBuffer::default();
        self.stdout = Some(Box::new(stdout.clone()));
        self.stderr = Some(Box::new(stderr.clone()));

        self.start().await?;
        let status = match self.wait().await {
            Ok(()) => ExitStatus::Code(0),
            Err(SshExecError::Remote(status)) => status,
            Err(e) => return Err(e),
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout.take()).into_owned(),
            stderr: String::from_utf8_lossy(&stderr.take()).into_owned(),
            status,
        })
    }

    /// Pipe to the remote stdin, plus the source set through `set_stdio`
    ///
    /// The pipe replaces that source on the session. Must be requested
    /// before [`start`](Self::start).
    pub async fn stdin_pipe(&mut self) -> Result<(ChildStdin, Option<BoxedReader>)> {
        let opened = self.opened("stdin").await?;
        let (pipe, source) = stdio::stdin_pipe();
        Ok((pipe, opened.stdin.replace(source)))
    }

    /// Pipe from the remote stdout, plus the sink set through `set_stdio`
    pub async fn stdout_pipe(&mut self) -> Result<(ChildStdout, Option<BoxedWriter>)> {
        let opened = self.opened("stdout").await?;
        let (pipe, sink) = stdio::stdout_pipe();
        Ok((pipe, opened.pump.stdout.replace(sink)))
    }

    /// Pipe from the remote stderr, plus the sink set through `set_stdio`
    pub async fn stderr_pipe(&mut self) -> Result<(ChildStderr, Option<BoxedWriter>)> {
        let opened = self.opened("stderr").await?;
        let (pipe, sink) = stdio::stderr_pipe();
        Ok((pipe, opened.pump.stderr.replace(sink)))
    }

    async fn opened(&mut self, stream: &str) -> Result<&mut Opened> {
        let live = self.ensure_session().await?;
        live.opened.as_mut().ok_or_else(|| {
            SshExecError::session(format!("{} pipe requested after command started", stream))
        })
    }

    fn resolve_credentials(&self) -> CredentialSet {
        match self.default_keys {
            Some(default_keys) if self.credentials.is_empty() => default_keys(),
            _ => self.credentials.clone(),
        }
    }

    /// Connect on first use; later calls reuse the session
    async fn ensure_session(&mut self) -> Result<&mut LiveSession> {
        if matches!(self.state, State::Closed) {
            return Err(SshExecError::Closed);
        }

        if matches!(self.state, State::Idle) {
            let credentials = self.resolve_credentials();
            let connection = connection::establish(&self.target, &credentials).await?;
            let pump = Pump::new(self.stdout.take(), self.stderr.take());
            self.state = State::Connected(LiveSession {
                handle: connection.handle,
                opened: Some(Opened {
                    channel: connection.channel,
                    stdin: self.stdin.take(),
                    pump,
                }),
                running: None,
            });
        }

        match &mut self.state {
            State::Connected(live) => Ok(live),
            State::Idle | State::Closed => Err(SshExecError::Closed),
        }
    }
}

impl std::fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Idle => "idle",
            State::Connected(live) if live.opened.is_some() => "connected",
            State::Connected(_) => "running",
            State::Closed => "closed",
        };
        f.debug_struct("RemoteCommand")
            .field("target", &self.target)
            .field("command", &self.command)
            .field("credentials", &self.credentials.len())
            .field("state", &state)
            .finish()
    }
}
