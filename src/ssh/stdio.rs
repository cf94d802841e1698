//! Standard stream plumbing for remote commands
//!
//! Static redirections are boxed `AsyncRead`/`AsyncWrite` values supplied
//! through `set_stdio`. Pipes are in-memory duplex streams whose far end is
//! driven by the session.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tracing::debug;

/// Buffer size of stdio pipes
pub(crate) const PIPE_CAPACITY: usize = 64 * 1024;

/// A boxed input source for the remote command's stdin
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// A boxed output sink for the remote command's stdout or stderr
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

macro_rules! pipe_reader {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug)]
        pub struct $name(DuplexStream);

        impl AsyncRead for $name {
            fn poll_read(
                self: Pin<&mut Self>,
                cx: &mut Context<'_>,
                buf: &mut ReadBuf<'_>,
            ) -> Poll<io::Result<()>> {
                Pin::new(&mut self.get_mut().0).poll_read(cx, buf)
            }
        }
    };
}

pipe_reader!(
    ChildStdout,
    "Read end of the remote command's stdout; EOF once the remote closes it"
);
pipe_reader!(
    ChildStderr,
    "Read end of the remote command's stderr; EOF once the remote closes it"
);

/// Write end of the remote command's stdin
///
/// Shutting it down or dropping it sends EOF to the remote command.
#[derive(Debug)]
pub struct ChildStdin(DuplexStream);

impl AsyncWrite for ChildStdin {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().0).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_shutdown(cx)
    }
}

/// Create a stdin pipe: the caller's writer and the session's source
pub(crate) fn stdin_pipe() -> (ChildStdin, BoxedReader) {
    let (caller, session) = tokio::io::duplex(PIPE_CAPACITY);
    (ChildStdin(caller), Box::new(session))
}

/// Create a stdout pipe: the caller's reader and the session's sink
pub(crate) fn stdout_pipe() -> (ChildStdout, BoxedWriter) {
    let (caller, session) = tokio::io::duplex(PIPE_CAPACITY);
    (ChildStdout(caller), Box::new(session))
}

/// Create a stderr pipe: the caller's reader and the session's sink
pub(crate) fn stderr_pipe() -> (ChildStderr, BoxedWriter) {
    let (caller, session) = tokio::io::duplex(PIPE_CAPACITY);
    (ChildStderr(caller), Box::new(session))
}

/// Destination for one output stream of the remote command
///
/// Data is discarded when no writer is attached, or once the writer fails
/// (for example a pipe whose reader was dropped).
pub(crate) struct Sink {
    name: &'static str,
    writer: Option<BoxedWriter>,
}

impl Sink {
    pub(crate) fn new(name: &'static str, writer: Option<BoxedWriter>) -> Self {
        Self { name, writer }
    }

    /// Attach a new writer, returning the previous one
    pub(crate) fn replace(&mut self, writer: BoxedWriter) -> Option<BoxedWriter> {
        self.writer.replace(writer)
    }

    pub(crate) async fn write(&mut self, data: &[u8]) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = writer.write_all(data).await {
            debug!("{} sink closed, discarding further output: {}", self.name, e);
            self.writer = None;
        }
    }

    /// Flush and close the writer so pipe readers observe EOF
    pub(crate) async fn finish(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush().await;
            let _ = writer.shutdown().await;
        }
    }
}

/// In-memory writer shared between clones, used to capture output
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub(crate) fn take(&self) -> Vec<u8> {
        match self.0.lock() {
            Ok(mut buf) => std::mem::take(&mut *buf),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.0.lock() {
            Ok(mut inner) => {
                inner.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            Err(_) => Poll::Ready(Err(io::Error::other("output buffer poisoned"))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
