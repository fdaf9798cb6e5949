//! Dual-path event publisher.
//!
//! [`Publisher`] emits one payload type on two independent paths: a
//! durable publish to the streaming broker (awaiting its positive
//! acknowledgment) and an optional best-effort fan-out over the
//! real-time transport. The two paths keep separate result types so a
//! fan-out failure can never masquerade as a durable failure.

use std::marker::PhantomData;
use std::sync::Arc;

use fleetbus_core::EventData;

use crate::broker::{BrokerError, BrokerSession};
use crate::envelope::{self, Event};
use crate::realtime::{RealtimeError, RealtimeTransport};

/// The durable publish did not get a positive broker acknowledgment.
///
/// Surfaced to the caller synchronously. The publisher performs no
/// retry of its own; retry and backoff policy belong to the caller so
/// duplicate intent stays explicit.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Broker did not acknowledge publish: {0}")]
    Broker(#[from] BrokerError),
}

/// Emits events of one subject to the broker and, optionally, the
/// real-time transport.
///
/// Publishing is a stateless round trip per call, so a session can be
/// shared by any number of publishers.
pub struct Publisher<E: EventData> {
    session: Arc<dyn BrokerSession>,
    realtime: Option<Arc<dyn RealtimeTransport>>,
    _event: PhantomData<E>,
}

impl<E: EventData> Publisher<E> {
    pub fn new(session: Arc<dyn BrokerSession>) -> Self {
        Self {
            session,
            realtime: None,
            _event: PhantomData,
        }
    }

    /// Attach a real-time transport for best-effort fan-out.
    pub fn with_realtime(mut self, transport: Arc<dyn RealtimeTransport>) -> Self {
        self.realtime = Some(transport);
        self
    }

    /// Durably publish a payload and wait for the broker's ack.
    pub async fn publish_durable(&self, data: &E) -> Result<(), PublishError> {
        let bytes = envelope::encode(data)?;
        self.session.publish(E::SUBJECT.as_str(), bytes).await?;

        tracing::debug!(subject = %E::SUBJECT, "Event durably published");
        Ok(())
    }

    /// Push the full envelope over the real-time transport.
    ///
    /// A documented no-op when no transport is configured. Best-effort
    /// by contract: failures are returned for observability but must
    /// be treated as non-fatal by callers, and this path never affects
    /// the durable one.
    pub async fn publish_realtime(&self, data: &E) -> Result<(), RealtimeError> {
        let Some(transport) = &self.realtime else {
            tracing::debug!(
                subject = %E::SUBJECT,
                "No real-time transport configured, skipping fan-out"
            );
            return Ok(());
        };

        let frame = serde_json::to_string(&Event {
            subject: E::SUBJECT,
            data,
        })?;

        transport.send(frame).await
    }

    /// Durable publish followed by best-effort real-time fan-out.
    ///
    /// The result reflects only the durable path; a fan-out failure is
    /// logged and swallowed.
    pub async fn publish(&self, data: &E) -> Result<(), PublishError> {
        self.publish_durable(data).await?;

        if let Err(e) = self.publish_realtime(data).await {
            tracing::warn!(
                subject = %E::SUBJECT,
                error = %e,
                "Real-time fan-out failed; durable publish unaffected"
            );
        }

        Ok(())
    }
}
