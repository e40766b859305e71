//! Interactive terminal bridge
//!
//! Relays one client transport to one remote shell with three concurrent
//! directions: client messages to shell stdin (with resize handling), shell
//! stdout to the client, and shell stderr to the client. The first direction
//! to finish, for any reason, cancels the other two. Only after all three
//! have stopped are the session resources released; the client transport is
//! closed last, within a bounded time.
//!
//! NIST 800-53: AC-12 (Session Termination), AU-2 (Audit Events)

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{ConnectOptions, ConnectionCredential, SshConnection};
use crate::control::{self, InboundMessage, PtyGeometry};
use crate::error::{Error, Result};
use crate::lifecycle::{Release, SessionLifecycle};
use crate::shell::{PtyControl, ShellInput, ShellOutput, ShellSession, ShellStreams};
use crate::transport::{MessageSink, MessageSource};

/// Terminal parameters for new shells
#[derive(Debug, Clone)]
pub struct TerminalOptions {
    pub term: String,
    pub geometry: PtyGeometry,
    /// Size of the read buffer of each output direction
    pub read_buffer_size: usize,
    /// How long closing the client transport may take
    pub close_timeout: Duration,
}

impl Default for TerminalOptions {
    fn default() -> Self {
        Self {
            term: "xterm".to_string(),
            geometry: PtyGeometry::default(),
            read_buffer_size: 1024,
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Bridge state; only moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BridgeState {
    Connecting,
    PtyRequested,
    ShellRunning,
    Closing,
    Closed,
}

/// One forwarding direction of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client messages to shell stdin
    Inbound,
    /// Shell stdout to client
    Stdout,
    /// Shell stderr to client
    Stderr,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inbound => "inbound",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        })
    }
}

/// How a direction stopped
#[derive(Debug)]
pub enum DirectionEnd {
    EndOfStream,
    Cancelled,
    Failed(Error),
}

/// Summary of a finished terminal session
#[derive(Debug)]
pub struct BridgeOutcome {
    pub session_id: Uuid,
    /// Direction whose end closed the session; `None` if that task panicked
    pub trigger: Option<Direction>,
    /// Error of the triggering direction, if it failed
    pub error: Option<Error>,
    /// Geometry after the last applied resize
    pub geometry: PtyGeometry,
    pub messages_forwarded: u64,
    pub resizes: u64,
    /// Control messages dropped as malformed
    pub protocol_errors: u64,
    pub chunks_sent: u64,
}

#[derive(Debug, Default)]
struct Counters {
    messages_forwarded: AtomicU64,
    resizes: AtomicU64,
    protocol_errors: AtomicU64,
    chunks_sent: AtomicU64,
}

/// Runs one interactive terminal session
pub struct TerminalBridge {
    options: TerminalOptions,
    state: watch::Sender<BridgeState>,
}

impl TerminalBridge {
    pub fn new(options: TerminalOptions) -> Self {
        let (state, _) = watch::channel(BridgeState::Connecting);
        Self { options, state }
    }

    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: BridgeState) {
        self.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });
    }

    /// Connect to the host, start a shell and bridge it to the client
    ///
    /// # Errors
    ///
    /// Connection and shell start failures are returned after the client
    /// transport has been closed with a sanitized reason. Once the shell
    /// runs, direction failures are reported in the [`BridgeOutcome`].
    pub async fn open<Src, Snk>(
        &self,
        credential: &ConnectionCredential,
        connect_options: &ConnectOptions,
        source: Src,
        mut sink: Snk,
    ) -> Result<BridgeOutcome>
    where
        Src: MessageSource + 'static,
        Snk: MessageSink + 'static,
    {
        self.set_state(BridgeState::Connecting);
        let mut connection = match SshConnection::connect(credential, connect_options).await {
            Ok(connection) => connection,
            Err(e) => {
                let e = Error::from(e);
                self.abandon(&mut sink, Some(&e.public_message())).await;
                return Err(e);
            }
        };

        self.set_state(BridgeState::PtyRequested);
        let shell = match connection
            .open_shell(&self.options.term, self.options.geometry)
            .await
        {
            Ok(shell) => shell,
            Err(e) => {
                warn!(remote = %connection.target(), error = %e, "Shell request failed");
                if let Err(close_err) = connection.close().await {
                    debug!(error = %close_err, "Close after shell failure failed");
                }
                self.abandon(&mut sink, Some(&e.public_message())).await;
                return Err(e);
            }
        };

        self.run(SessionLifecycle::new(connection, shell), source, sink)
            .await
    }

    async fn abandon<Snk: MessageSink>(&self, sink: &mut Snk, reason: Option<&str>) {
        self.set_state(BridgeState::Closing);
        self.close_client(sink, reason).await;
        self.set_state(BridgeState::Closed);
    }

    /// Close the client transport, giving up after `close_timeout`
    ///
    /// A client that stopped reading can stall the close handshake forever.
    async fn close_client<Snk: MessageSink>(&self, sink: &mut Snk, reason: Option<&str>) {
        let close = async {
            match reason {
                Some(reason) => sink.close_with_reason(reason).await,
                None => sink.close().await,
            }
        };
        match tokio::time::timeout(self.options.close_timeout, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Closing client transport failed"),
            Err(_) => warn!(
                timeout = ?self.options.close_timeout,
                "Client transport did not close in time; abandoning it"
            ),
        }
    }

    /// Bridge an already running shell to the client
    pub async fn run<C, S, Src, Snk>(
        &self,
        mut lifecycle: SessionLifecycle<C, S>,
        source: Src,
        mut sink: Snk,
    ) -> Result<BridgeOutcome>
    where
        C: Release + 'static,
        S: ShellSession + 'static,
        Src: MessageSource + 'static,
        Snk: MessageSink + 'static,
    {
        let session_id = lifecycle.id();
        let Some(streams) = lifecycle.shell_mut().and_then(ShellSession::take_streams) else {
            let released = lifecycle.release().await;
            self.abandon(&mut sink, Some("terminal session unavailable")).await;
            released?;
            return Err(Error::ChannelClosed("shell streams already taken".to_string()));
        };

        self.set_state(BridgeState::ShellRunning);
        info!(
            event = "terminal_started",
            session_id = %session_id,
            rows = self.options.geometry.rows,
            cols = self.options.geometry.cols,
            "Terminal session started"
        );

        let ShellStreams {
            stdin,
            stdout,
            stderr,
            pty,
        } = streams;
        let sink = Arc::new(Mutex::new(sink));
        let counters = Arc::new(Counters::default());
        let (geometry_tx, geometry_rx) = watch::channel(self.options.geometry);
        let token = CancellationToken::new();
        let buffer_size = self.options.read_buffer_size.max(1);

        let mut tasks = JoinSet::new();
        tasks.spawn(supervise(
            Direction::Inbound,
            token.clone(),
            forward_inbound(source, stdin, pty, geometry_tx, Arc::clone(&counters)),
        ));
        tasks.spawn(supervise(
            Direction::Stdout,
            token.clone(),
            forward_output(stdout, Arc::clone(&sink), buffer_size, Arc::clone(&counters)),
        ));
        tasks.spawn(supervise(
            Direction::Stderr,
            token.clone(),
            forward_output(stderr, Arc::clone(&sink), buffer_size, Arc::clone(&counters)),
        ));

        let mut trigger: Option<(Option<Direction>, DirectionEnd)> = None;
        while let Some(joined) = tasks.join_next().await {
            let (direction, end) = match joined {
                Ok((direction, end)) => (Some(direction), end),
                Err(join_error) => {
                    let error = Error::Transport(format!("bridge task failed: {join_error}"));
                    (None, DirectionEnd::Failed(error))
                }
            };
            let label = direction.map_or_else(|| "unknown".to_string(), |d| d.to_string());

            match &end {
                DirectionEnd::Failed(e) => {
                    warn!(session_id = %session_id, direction = %label, error = %e, "Direction failed");
                }
                DirectionEnd::EndOfStream => {
                    debug!(session_id = %session_id, direction = %label, "Direction reached end of stream");
                }
                DirectionEnd::Cancelled => {
                    debug!(session_id = %session_id, direction = %label, "Direction cancelled");
                }
            }

            if trigger.is_none() && !matches!(end, DirectionEnd::Cancelled) {
                self.set_state(BridgeState::Closing);
                token.cancel();
                trigger = Some((direction, end));
            }
        }

        self.set_state(BridgeState::Closing);
        if let Err(e) = lifecycle.release().await {
            warn!(session_id = %session_id, error = %e, "Session release reported an error");
        }
        self.close_client(&mut *sink.lock().await, None).await;
        self.set_state(BridgeState::Closed);

        let (trigger, end) = trigger.unwrap_or((None, DirectionEnd::EndOfStream));
        let outcome = BridgeOutcome {
            session_id,
            trigger,
            error: match end {
                DirectionEnd::Failed(e) => Some(e),
                DirectionEnd::EndOfStream | DirectionEnd::Cancelled => None,
            },
            geometry: *geometry_rx.borrow(),
            messages_forwarded: counters.messages_forwarded.load(Ordering::Relaxed),
            resizes: counters.resizes.load(Ordering::Relaxed),
            protocol_errors: counters.protocol_errors.load(Ordering::Relaxed),
            chunks_sent: counters.chunks_sent.load(Ordering::Relaxed),
        };

        info!(
            event = "terminal_closed",
            session_id = %session_id,
            trigger = ?outcome.trigger,
            failed = outcome.error.is_some(),
            messages_forwarded = outcome.messages_forwarded,
            chunks_sent = outcome.chunks_sent,
            "Terminal session closed"
        );
        Ok(outcome)
    }
}

async fn supervise<F>(direction: Direction, token: CancellationToken, work: F) -> (Direction, DirectionEnd)
where
    F: Future<Output = DirectionEnd>,
{
    tokio::select! {
        () = token.cancelled() => (direction, DirectionEnd::Cancelled),
        end = work => (direction, end),
    }
}

/// Client messages to shell stdin; resize requests go to the PTY instead
async fn forward_inbound<Src: MessageSource>(
    mut source: Src,
    mut stdin: ShellInput,
    mut pty: Box<dyn PtyControl>,
    geometry: watch::Sender<PtyGeometry>,
    counters: Arc<Counters>,
) -> DirectionEnd {
    loop {
        let message = match source.recv().await {
            None => return DirectionEnd::EndOfStream,
            Some(Err(e)) => return DirectionEnd::Failed(e),
            Some(Ok(message)) => message,
        };

        match control::classify(&message) {
            InboundMessage::Resize(requested) => match pty.resize(requested).await {
                Ok(()) => {
                    geometry.send_replace(requested);
                    counters.resizes.fetch_add(1, Ordering::Relaxed);
                    debug!(rows = requested.rows, cols = requested.cols, "PTY resized");
                }
                Err(e) => warn!(error = %e, "PTY resize failed"),
            },
            InboundMessage::Malformed(reason) => {
                let error = Error::Protocol(reason);
                counters.protocol_errors.fetch_add(1, Ordering::Relaxed);
                warn!(event = "terminal_protocol_error", error = %error, "Dropping malformed control message");
            }
            InboundMessage::Keystrokes(bytes) => {
                if bytes.is_empty() {
                    continue;
                }
                if let Err(e) = write_all_flush(&mut stdin, bytes).await {
                    return DirectionEnd::Failed(e.into());
                }
                counters.messages_forwarded.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

async fn write_all_flush(stdin: &mut ShellInput, bytes: &[u8]) -> std::io::Result<()> {
    stdin.write_all(bytes).await?;
    stdin.flush().await
}

/// Shell output to the client, one message per read
async fn forward_output<Snk: MessageSink>(
    mut reader: ShellOutput,
    sink: Arc<Mutex<Snk>>,
    buffer_size: usize,
    counters: Arc<Counters>,
) -> DirectionEnd {
    let mut buffer = vec![0u8; buffer_size];
    loop {
        let read = match reader.read(&mut buffer).await {
            Ok(0) => return DirectionEnd::EndOfStream,
            Ok(read) => read,
            Err(e) => return DirectionEnd::Failed(e.into()),
        };
        let chunk = Bytes::copy_from_slice(&buffer[..read]);
        if let Err(e) = sink.lock().await.send(chunk).await {
            return DirectionEnd::Failed(e);
        }
        counters.chunks_sent.fetch_add(1, Ordering::Relaxed);
    }
}
