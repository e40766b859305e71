//! Client-facing message transport
//!
//! The terminal bridge speaks to the browser through these two traits; the
//! HTTP layer adapts a WebSocket to them.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Ordered stream of messages from the client
#[async_trait]
pub trait MessageSource: Send {
    /// Next message; `None` once the client has closed the transport
    async fn recv(&mut self) -> Option<Result<Bytes>>;
}

/// Ordered stream of messages to the client
#[async_trait]
pub trait MessageSink: Send {
    async fn send(&mut self, payload: Bytes) -> Result<()>;

    /// Close the transport; a second call is a no-op
    async fn close(&mut self) -> Result<()>;

    /// Close the transport, telling the client why the session ended
    ///
    /// `reason` must already be safe to show to the client.
    async fn close_with_reason(&mut self, _reason: &str) -> Result<()> {
        self.close().await
    }
}
