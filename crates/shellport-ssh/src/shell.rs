//! Remote shell channel split into independent streams
//!
//! The SSH channel multiplexes stdout (channel data) and stderr (extended
//! data type 1) on one reader. A demultiplexing task copies each into its
//! own in-memory pipe so the bridge can run one forwarding direction per
//! stream.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg, ChannelReadHalf, ChannelWriteHalf};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::control::PtyGeometry;
use crate::error::Result;
use crate::lifecycle::Release;

/// SSH extended data type for stderr (RFC 4254, Section 5.2)
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Capacity of each demultiplexed output pipe
const PIPE_CAPACITY: usize = 64 * 1024;

/// Changes the window size of a running PTY
#[async_trait]
pub trait PtyControl: Send {
    async fn resize(&mut self, geometry: PtyGeometry) -> Result<()>;
}

pub type ShellInput = Pin<Box<dyn AsyncWrite + Send>>;
pub type ShellOutput = Pin<Box<dyn AsyncRead + Send>>;

/// The three streams of a running shell plus its PTY control
pub struct ShellStreams {
    pub stdin: ShellInput,
    pub stdout: ShellOutput,
    pub stderr: ShellOutput,
    pub pty: Box<dyn PtyControl>,
}

/// A running interactive shell
pub trait ShellSession: Release {
    /// Hand out the streams; `None` after the first call
    fn take_streams(&mut self) -> Option<ShellStreams>;
}

struct ChannelPty {
    writer: Arc<ChannelWriteHalf<Msg>>,
}

#[async_trait]
impl PtyControl for ChannelPty {
    async fn resize(&mut self, geometry: PtyGeometry) -> Result<()> {
        self.writer
            .window_change(geometry.cols, geometry.rows, 0, 0)
            .await?;
        Ok(())
    }
}

/// Interactive shell on an SSH session channel
pub struct RemoteShell {
    streams: Option<ShellStreams>,
    writer: Arc<ChannelWriteHalf<Msg>>,
    demux: Option<JoinHandle<Option<u32>>>,
    closed: bool,
}

impl RemoteShell {
    /// Wrap a channel on which a PTY and shell were granted
    pub fn start(channel: Channel<Msg>) -> Self {
        let (reader, writer) = channel.split();
        let writer = Arc::new(writer);

        let (stdout_tx, stdout_rx) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_tx, stderr_rx) = tokio::io::duplex(PIPE_CAPACITY);
        let demux = tokio::spawn(demultiplex(reader, stdout_tx, stderr_tx));

        let streams = ShellStreams {
            stdin: Box::pin(writer.make_writer()),
            stdout: Box::pin(stdout_rx),
            stderr: Box::pin(stderr_rx),
            pty: Box::new(ChannelPty {
                writer: Arc::clone(&writer),
            }),
        };

        Self {
            streams: Some(streams),
            writer,
            demux: Some(demux),
            closed: false,
        }
    }
}

impl ShellSession for RemoteShell {
    fn take_streams(&mut self) -> Option<ShellStreams> {
        self.streams.take()
    }
}

#[async_trait]
impl Release for RemoteShell {
    async fn release(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.streams = None;

        // The demultiplexer only finishes once the remote closed the channel
        let remote_closed = self.demux.as_ref().is_some_and(JoinHandle::is_finished);

        if let Err(e) = self.writer.eof().await {
            debug!(error = %e, "EOF on shell channel failed");
        }
        let result = settle_close(self.writer.close().await, remote_closed);

        if let Some(demux) = self.demux.take() {
            if demux.is_finished() {
                if let Ok(Some(status)) = demux.await {
                    debug!(exit_status = status, "Remote shell exited");
                }
            } else {
                demux.abort();
            }
        }

        result
    }
}

/// Closing a channel the remote already closed is not a failure
fn settle_close(result: std::result::Result<(), russh::Error>, remote_closed: bool) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if remote_closed => {
            debug!(error = %e, "Shell channel already closed by the remote");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

impl Drop for RemoteShell {
    fn drop(&mut self) {
        if let Some(demux) = self.demux.take() {
            demux.abort();
        }
    }
}

/// Copy channel output into the stdout and stderr pipes until the channel ends
///
/// Returns the remote exit status when one was reported.
async fn demultiplex(
    mut reader: ChannelReadHalf,
    mut stdout: DuplexStream,
    mut stderr: DuplexStream,
) -> Option<u32> {
    let mut exit_status = None;
    while let Some(message) = reader.wait().await {
        match message {
            ChannelMsg::Data { data } => {
                if stdout.write_all(&data).await.is_err() {
                    break;
                }
            }
            ChannelMsg::ExtendedData { data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                if stderr.write_all(&data).await.is_err() {
                    break;
                }
            }
            ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
            ChannelMsg::Eof => {
                // Output is over; keep reading for the exit status
                stdout.shutdown().await.ok();
                stderr.shutdown().await.ok();
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }
    exit_status
}
