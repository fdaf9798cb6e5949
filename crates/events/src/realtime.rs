//! Secondary real-time transport for best-effort fan-out.
//!
//! The durable broker is the source of truth; this transport exists
//! only to shave latency for subscribers that want events pushed the
//! moment they are published. Every delivery is fire-and-forget, and
//! [`WsFanout`] opens a fresh connection per frame — request/response
//! style, not a sustained stream.

use async_trait::async_trait;
use futures::SinkExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Errors from the real-time fan-out path.
///
/// These are never folded into a durable-publish failure; callers log
/// them and move on.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    /// The frame could not be encoded.
    #[error("Failed to encode real-time frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// The transport endpoint could not be reached.
    #[error("Failed to connect to real-time endpoint: {0}")]
    Connect(String),

    /// The connection was established but the frame could not be
    /// delivered (send, flush, or close failed).
    #[error("Failed to deliver real-time frame: {0}")]
    Transport(String),
}

/// A transport that can push one encoded frame to interested parties.
///
/// Implementations must not retry; the caller decided this path is
/// best-effort.
#[async_trait]
pub trait RealtimeTransport: Send + Sync + 'static {
    async fn send(&self, frame: String) -> Result<(), RealtimeError>;
}

/// WebSocket fan-out endpoint.
///
/// Each [`send`](RealtimeTransport::send) performs a fresh connect,
/// delivers a single text frame, and closes the connection. A v4
/// client id is appended to the handshake URL so the receiving side
/// can correlate connections in its logs.
pub struct WsFanout {
    url: String,
}

impl WsFanout {
    /// Create a fan-out targeting a WebSocket URL, e.g.
    /// `ws://realtime:4010/events`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The configured endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RealtimeTransport for WsFanout {
    async fn send(&self, frame: String) -> Result<(), RealtimeError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let url = format!("{}?clientId={}", self.url, client_id);

        let (mut ws_stream, _response) = connect_async(&url)
            .await
            .map_err(|e| RealtimeError::Connect(format!("{}: {e}", self.url)))?;

        ws_stream
            .send(Message::Text(frame))
            .await
            .map_err(|e| RealtimeError::Transport(e.to_string()))?;

        ws_stream
            .close(None)
            .await
            .map_err(|e| RealtimeError::Transport(e.to_string()))?;

        tracing::debug!(url = %self.url, client_id = %client_id, "Real-time frame delivered");
        Ok(())
    }
}
