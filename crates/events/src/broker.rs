//! The seam between this library and the streaming broker.
//!
//! Everything the publisher and listener need from the broker is
//! expressed through [`BrokerSession`] and [`BrokerConsumer`], so the
//! actual transport stays an external collaborator. The in-process
//! implementation lives in [`memory`](crate::memory); a deployment
//! against a real broker supplies its own implementation of these
//! traits.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Errors surfaced by a broker implementation.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The connection to the broker failed or timed out.
    #[error("Broker connection error: {0}")]
    Connection(String),

    /// The broker refused the publish (no positive acknowledgment).
    #[error("Broker rejected publish: {0}")]
    Rejected(String),

    /// The requested stream does not exist.
    #[error("Stream {0:?} not found")]
    StreamNotFound(String),

    /// The consumer was removed upstream while in use. Fatal to the
    /// pull loop bound to it.
    #[error("Consumer {consumer:?} was deleted from stream {stream:?}")]
    ConsumerDeleted { stream: String, consumer: String },

    /// An ack or nak could not be transmitted.
    #[error("Acknowledgment failed: {0}")]
    Ack(String),
}

/// A connection to the streaming broker.
///
/// Cheap to share: publishing is a stateless round trip per call, so
/// any number of publishers may hold the same session. Consumer
/// handles resolved from a session are owned by exactly one listener.
#[async_trait]
pub trait BrokerSession: Send + Sync + 'static {
    /// Durably publish `payload` under `subject`.
    ///
    /// Resolves only after the broker has positively acknowledged the
    /// message; an `Err` means the message may not have been stored.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Resolve (creating if necessary) the durable consumer
    /// `consumer` on `stream`, filtered to `subject`.
    ///
    /// Resolving an existing consumer returns a handle to the same
    /// broker-side state; delivery position is never reset.
    async fn resolve_consumer(
        &self,
        stream: &str,
        consumer: &str,
        subject: &str,
        ack_wait: Duration,
    ) -> Result<Arc<dyn BrokerConsumer>, BrokerError>;
}

/// A named cursor over a durable stream.
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Pull up to `max_messages` messages, waiting at most `max_wait`
    /// for the first one. An empty batch is a normal outcome.
    async fn fetch(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<DeliveredMessage>, BrokerError>;
}

/// Per-message acknowledgment channel back to the broker.
///
/// Implemented by broker backends; library code acks and naks through
/// [`DeliveredMessage`].
#[async_trait]
pub trait MessageAck: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
    async fn nak(&self) -> Result<(), BrokerError>;
}

/// One message handed out by a [`BrokerConsumer`] fetch.
pub struct DeliveredMessage {
    /// Subject the message was published under.
    pub subject: String,
    /// Raw payload bytes as published.
    pub payload: Vec<u8>,
    /// Position in the stream's log.
    pub sequence: u64,
    /// Delivery attempt counter, starting at 1 for the first delivery.
    pub deliveries: u32,
    acker: Box<dyn MessageAck>,
}

impl DeliveredMessage {
    pub fn new(
        subject: impl Into<String>,
        payload: Vec<u8>,
        sequence: u64,
        deliveries: u32,
        acker: Box<dyn MessageAck>,
    ) -> Self {
        Self {
            subject: subject.into(),
            payload,
            sequence,
            deliveries,
            acker,
        }
    }

    /// Acknowledge the message; the broker will not redeliver it.
    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    /// Negatively acknowledge the message; the broker redelivers it
    /// once the consumer's ack window has elapsed.
    pub async fn nak(&self) -> Result<(), BrokerError> {
        self.acker.nak().await
    }
}

impl fmt::Debug for DeliveredMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveredMessage")
            .field("subject", &self.subject)
            .field("sequence", &self.sequence)
            .field("deliveries", &self.deliveries)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
