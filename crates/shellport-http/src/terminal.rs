//! Interactive terminal over WebSocket
//!
//! The upgraded socket is split into a [`WsSource`] and a [`WsSink`] and
//! handed to a [`TerminalBridge`]. Shell output goes out as text frames by
//! default; a UTF-8 sequence cut by a read boundary is held back until the
//! next chunk completes it.

use async_trait::async_trait;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use shellport_core::{HostRecord, OutputFrame};
use shellport_ssh::{Error, MessageSink, MessageSource, TerminalBridge};
use std::fmt::Display;
use tracing::{Instrument, debug, info_span, warn};

use crate::AppState;
use crate::api::resolve_host;
use crate::error::ApiError;
use crate::settings::{connect_options, credential_for, terminal_options};

/// `GET /api/host/{id}/webshell`
///
/// The origin is checked and the host resolved before the upgrade, so a
/// refused or unknown request gets a plain HTTP status.
pub async fn webshell(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let origin = headers
        .get(header::ORIGIN)
        .map(|value| value.to_str().unwrap_or_default());
    if !state.origins.permits(origin) {
        warn!(
            event = "terminal_origin_refused",
            host_id = id,
            origin = origin.unwrap_or_default(),
            "Terminal upgrade refused for origin"
        );
        return Err(ApiError::Forbidden("origin not allowed".to_string()));
    }

    let host = resolve_host(&state, id).await?;
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let span = info_span!(
        "terminal",
        host_id = id,
        remote = %format!("{}:{}", host.address, host.port)
    );
    Ok(upgrade
        .on_failed_upgrade(move |e| warn!(host_id = id, error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| run_terminal(socket, host, state).instrument(span)))
}

async fn run_terminal(socket: WebSocket, host: HostRecord, state: AppState) {
    let (sender, receiver) = socket.split();
    let source = WsSource::new(receiver);
    let sink = WsSink::new(sender, state.config.terminal.output_frame);

    let bridge = TerminalBridge::new(terminal_options(&state.config.terminal));
    let credential = credential_for(&host);
    let options = connect_options(&host, &state.config.ssh);

    match bridge.open(&credential, &options, source, sink).await {
        Ok(outcome) => {
            if let Some(e) = outcome.error {
                debug!(session_id = %outcome.session_id, error = %e, "Terminal ended on a failed direction");
            }
        }
        Err(e) => {
            warn!(event = "terminal_open_failed", error = %e, "Terminal could not be started");
        }
    }
}

/// Client messages from a WebSocket receive half
pub struct WsSource<S> {
    inner: S,
}

impl<S> WsSource<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S, E> MessageSource for WsSource<S>
where
    S: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: Display + Send,
{
    async fn recv(&mut self) -> Option<shellport_ssh::Result<Bytes>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(Error::Transport(e.to_string()))),
            };
            match message {
                Message::Text(text) => {
                    return Some(Ok(Bytes::copy_from_slice(text.as_str().as_bytes())));
                }
                Message::Binary(data) => return Some(Ok(data)),
                Message::Close(_) => return None,
                // Pings are answered by the WebSocket layer
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    }
}

/// Shell output to a WebSocket send half
pub struct WsSink<S> {
    inner: S,
    frame: OutputFrame,
    carry: Utf8Carry,
    closed: bool,
}

/// Longest close reason a WebSocket close frame can carry (RFC 6455, Section 5.5)
const MAX_CLOSE_REASON: usize = 123;

impl<S> WsSink<S> {
    pub fn new(inner: S, frame: OutputFrame) -> Self {
        Self {
            inner,
            frame,
            carry: Utf8Carry::default(),
            closed: false,
        }
    }
}

impl<S> WsSink<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display + Send,
{
    async fn shutdown(&mut self, frame: Option<CloseFrame>) -> shellport_ssh::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let tail = self.carry.finish();
        if !tail.is_empty() {
            self.inner
                .send(Message::Text(tail.into()))
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
        }
        self.inner
            .send(Message::Close(frame))
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        self.inner
            .close()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

/// Cut `reason` to fit a close frame without splitting a character
fn close_reason(reason: &str) -> String {
    let mut end = reason.len().min(MAX_CLOSE_REASON);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

#[async_trait]
impl<S> MessageSink for WsSink<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display + Send,
{
    async fn send(&mut self, payload: Bytes) -> shellport_ssh::Result<()> {
        if self.closed {
            return Err(Error::ChannelClosed("terminal socket closed".to_string()));
        }
        let message = match self.frame {
            OutputFrame::Binary => Message::Binary(payload),
            OutputFrame::Text => {
                let text = self.carry.push(&payload);
                if text.is_empty() {
                    return Ok(());
                }
                Message::Text(text.into())
            }
        };
        self.inner
            .send(message)
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn close(&mut self) -> shellport_ssh::Result<()> {
        self.shutdown(None).await
    }

    async fn close_with_reason(&mut self, reason: &str) -> shellport_ssh::Result<()> {
        let frame = CloseFrame {
            code: close_code::ERROR,
            reason: close_reason(reason).into(),
        };
        self.shutdown(Some(frame)).await
    }
}

/// Turns a byte stream into valid UTF-8 text chunks
///
/// An incomplete sequence at the end of a chunk is kept for the next one;
/// invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut text = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        while !rest.is_empty() {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(invalid) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[invalid..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let keep = rest.len();
        let consumed = self.pending.len() - keep;
        self.pending.drain(..consumed);
        text
    }

    /// Flush whatever is pending, replacing an unfinished sequence
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}
