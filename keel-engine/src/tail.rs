//! Log tailing
//!
//! A background task drains the container's combined log stream through the
//! [`Demuxer`] and forwards plain bytes into an in-memory pipe. The caller
//! reads the other end through [`LogReader`], which owns the task: dropping
//! the reader aborts the task, and the task closing its end (log stream
//! finished or failed) ends the reader.

use futures::{StreamExt, TryStreamExt};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use crate::demux::Demuxer;
use crate::runtime::LogStream;

const PIPE_CAPACITY: usize = 32 * 1024;

/// Plain, ordered output of one container
///
/// Finite and single pass: it ends once the container's log stream closes.
#[derive(Debug)]
pub struct LogReader {
    pipe: DuplexStream,
    task: JoinHandle<()>,
}

impl LogReader {
    /// Spawns the demultiplexing task for `logs`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(container: String, logs: LogStream) -> Self {
        let (pipe, writer) = tokio::io::duplex(PIPE_CAPACITY);
        let task = tokio::spawn(forward(container, logs, writer));
        Self { pipe, task }
    }
}

impl AsyncRead for LogReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_read(cx, buf)
    }
}

impl Drop for LogReader {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn forward(container: String, logs: LogStream, mut writer: DuplexStream) {
    let reader = StreamReader::new(logs.map_err(io::Error::other));
    let mut frames = FramedRead::new(reader, Demuxer::new());

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(chunk) => {
                if let Err(e) = writer.write_all(&chunk).await {
                    debug!("Log reader for {} closed: {}", container, e);
                    break;
                }
            }
            Err(e) => {
                warn!("Log stream for {} failed: {}", container, e);
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
    debug!("Log stream for {} finished", container);
}
