//! Byte streams the SSH handshake runs over
//!
//! A [`Tunnel`] is either a direct TCP connection or one end of an in-memory
//! duplex pipe whose other end is relayed to a spawned proxy command. The
//! handshake code only sees `AsyncRead + AsyncWrite`.

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, trace, warn};

use crate::error::{Result, SshExecError};

/// Buffer size of the in-memory pipe between the handshake and the proxy
const PIPE_CAPACITY: usize = 64 * 1024;

/// How long a proxy command may keep running after the tunnel closed
pub const PROXY_EXIT_GRACE: Duration = Duration::from_secs(2);

/// An ordered, reliable, bidirectional byte stream to the SSH server
#[derive(Debug)]
pub enum Tunnel {
    /// Direct TCP connection
    Direct(TcpStream),
    /// Pipe relayed through a proxy command's stdin/stdout
    Proxied(DuplexStream),
}

impl AsyncRead for Tunnel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Tunnel::Direct(stream) => Pin::new(stream).poll_read(cx, buf),
            Tunnel::Proxied(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Tunnel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Tunnel::Direct(stream) => Pin::new(stream).poll_write(cx, buf),
            Tunnel::Proxied(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Tunnel::Direct(stream) => Pin::new(stream).poll_flush(cx),
            Tunnel::Proxied(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Tunnel::Direct(stream) => Pin::new(stream).poll_shutdown(cx),
            Tunnel::Proxied(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Open a byte stream to `host:port`, directly or through `proxy_command`
///
/// `user` is the already-resolved remote user, used for `%r`.
pub async fn dial(host: &str, port: u16, user: &str, proxy_command: &[String]) -> Result<Tunnel> {
    let addr = join_host_port(host, port);

    if proxy_command.is_empty() {
        debug!("Dialing {} directly", addr);
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| SshExecError::dial(&addr, e))?;
        return Ok(Tunnel::Direct(stream));
    }

    let argv = expand_proxy_command(proxy_command, host, port, user);
    trace!("executing proxy command {:?}", argv);

    let (program, args) = match argv.split_first() {
        Some((program, args)) if !program.is_empty() => (program, args),
        _ => {
            return Err(SshExecError::dial(
                &addr,
                io::Error::new(io::ErrorKind::InvalidInput, "empty proxy command"),
            ))
        }
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SshExecError::dial(&addr, e))?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(SshExecError::dial(
            &addr,
            io::Error::other("proxy command did not expose stdin/stdout"),
        ));
    };

    let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
    tokio::spawn(relay(child, stdin, stdout, remote, argv.join(" ")));

    Ok(Tunnel::Proxied(local))
}

/// Shuttle bytes between the pipe and the proxy command, then reap it
async fn relay(
    mut child: Child,
    mut stdin: ChildStdin,
    mut stdout: ChildStdout,
    pipe: DuplexStream,
    command_line: String,
) {
    let (mut pipe_rx, mut pipe_tx) = tokio::io::split(pipe);

    let downstream = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut stdout, &mut pipe_tx).await;
        let _ = pipe_tx.shutdown().await;
        copied
    });

    match tokio::io::copy(&mut pipe_rx, &mut stdin).await {
        Ok(n) => trace!("proxy tunnel closed after {} bytes upstream", n),
        Err(e) => debug!("proxy tunnel upstream ended: {}", e),
    }
    drop(stdin);

    match tokio::time::timeout(PROXY_EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!("proxy command `{}` exited: {}", command_line, status),
        Ok(Err(e)) => warn!("failed to wait for proxy command `{}`: {}", command_line, e),
        Err(_) => {
            debug!(
                "proxy command `{}` still running after tunnel closed, killing",
                command_line
            );
            if let Err(e) = child.kill().await {
                warn!("failed to kill proxy command `{}`: {}", command_line, e);
            }
        }
    }

    downstream.abort();
}

/// Substitute `%h`, `%p`, `%r` and `%%` in every argument
///
/// Each argument is scanned once, left to right; substituted text is not
/// rescanned. Unknown `%x` sequences are kept as-is.
pub fn expand_proxy_command(template: &[String], host: &str, port: u16, user: &str) -> Vec<String> {
    let port = port.to_string();
    template
        .iter()
        .map(|arg| expand_tokens(arg, host, &port, user))
        .collect()
}

fn expand_tokens(arg: &str, host: &str, port: &str, user: &str) -> String {
    let mut rendered = String::with_capacity(arg.len());
    let mut chars = arg.chars();

    while let Some(ch) = chars.next() {
        if ch != '%' {
            rendered.push(ch);
            continue;
        }
        match chars.next() {
            Some('h') => rendered.push_str(host),
            Some('p') => rendered.push_str(port),
            Some('r') => rendered.push_str(user),
            Some('%') => rendered.push('%'),
            Some(other) => {
                rendered.push('%');
                rendered.push(other);
            }
            None => rendered.push('%'),
        }
    }

    rendered
}

/// Format `host:port`, bracketing IPv6 literals
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_expand_host_and_port() {
        let expanded = expand_proxy_command(&argv(&["nc", "%h", "%p"]), "db", 5432, "alice");
        assert_eq!(expanded, argv(&["nc", "db", "5432"]));
    }

    #[test]
    fn test_expand_user_and_embedded_tokens() {
        let expanded = expand_proxy_command(
            &argv(&["ssh", "-W", "%h:%p", "%r@jump"]),
            "web",
            22,
            "bob",
        );
        assert_eq!(expanded, argv(&["ssh", "-W", "web:22", "bob@jump"]));
    }

    #[test]
    fn test_expand_without_tokens_is_identity() {
        let template = argv(&["corkscrew", "proxy.local", "8080"]);
        let once = expand_proxy_command(&template, "h", 1, "u");
        assert_eq!(once, template);
        assert_eq!(expand_proxy_command(&once, "h", 1, "u"), once);
    }

    #[test]
    fn test_expand_does_not_rescan_substituted_text() {
        let expanded = expand_proxy_command(&argv(&["%h"]), "%p", 22, "u");
        assert_eq!(expanded, argv(&["%p"]));
    }

    #[test]
    fn test_expand_escapes_and_unknown_tokens() {
        let expanded = expand_proxy_command(&argv(&["100%%", "%x", "50%"]), "h", 22, "u");
        assert_eq!(expanded, argv(&["100%", "%x", "50%"]));
    }

    #[test]
    fn test_join_host_port() {
        assert_eq!(join_host_port("example.com", 22), "example.com:22");
        assert_eq!(join_host_port("::1", 2222), "[::1]:2222");
        assert_eq!(join_host_port("[::1]", 2222), "[::1]:2222");
    }

    #[tokio::test]
    async fn test_dial_direct_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = dial("127.0.0.1", port, "u", &[]).await;
        assert!(matches!(result, Err(SshExecError::Dial { .. })));
    }

    #[tokio::test]
    async fn test_dial_proxy_spawn_failure() {
        let proxy = argv(&["/nonexistent/proxy-command", "%h"]);
        let result = dial("host", 22, "u", &proxy).await;
        match result {
            Err(SshExecError::Dial { addr, source }) => {
                assert_eq!(addr, "host:22");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected dial error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dial_empty_proxy_program() {
        let result = dial("host", 22, "u", &argv(&[""])).await;
        assert!(matches!(result, Err(SshExecError::Dial { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_proxy_tunnel_relays_bytes() {
        let mut tunnel = dial("host", 22, "u", &argv(&["cat"])).await.unwrap();
        assert!(matches!(tunnel, Tunnel::Proxied(_)));

        tunnel.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        tunnel.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_proxy_argv_is_substituted() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("argv");
        let script = format!("printf '%s\\n' \"$@\" > {}", out.display());
        let proxy = argv(&["sh", "-c", script.as_str(), "sh", "%h", "%p", "%r"]);

        let mut tunnel = dial("db", 5432, "alice", &proxy).await.unwrap();
        // the script exits without writing, so the tunnel reaches EOF
        let mut rest = Vec::new();
        tunnel.read_to_end(&mut rest).await.unwrap();

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written, "db\n5432\nalice\n");
    }
}
