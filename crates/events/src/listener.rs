//! Durable event consumption: consumer lifecycle and pull loop.
//!
//! A [`Listener`] binds one durable consumer on one stream, pulls
//! batches of messages, decodes each into a typed envelope, and
//! dispatches to the supplied [`EventHandler`]. A handler success acks
//! the message; a handler (or decode) failure naks it, which makes the
//! broker redeliver after the consumer's ack window. Every message is
//! processed in its own isolated unit — one failure never skips the
//! rest of the batch.
//!
//! Delivery is at-least-once: handlers must be idempotent with respect
//! to the payload's id and version. There is no maximum-redelivery or
//! dead-letter threshold; a message that keeps failing redelivers
//! indefinitely. Handlers that want a cap can inspect
//! [`MessageInfo::deliveries`] and ack after their own limit.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetbus_core::EventData;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerConsumer, BrokerError, BrokerSession, DeliveredMessage};
use crate::envelope::{self, Event};

/// Default number of messages pulled per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default time the broker waits for an ack before a delivered message
/// becomes eligible for redelivery.
pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(5);

/// Identity and tuning of one durable consumer.
///
/// `consumer` is the stable consumer-group name: reuse it across
/// process restarts and the broker resumes delivery from the recorded
/// position. At most one live pull loop should be bound to a given
/// `(stream, consumer)` pair per process.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub stream: String,
    pub consumer: String,
    pub ack_wait: Duration,
    pub batch_size: usize,
}

impl ConsumerConfig {
    pub fn new(stream: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            consumer: consumer.into(),
            ack_wait: DEFAULT_ACK_WAIT,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Errors that end a listener operation.
///
/// Per-message failures (decode errors, handler errors) never appear
/// here; they are contained at the message boundary and resolved by
/// nak + redelivery.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The broker-side stream or consumer could not be resolved, or
    /// was removed while in use. Fatal to the affected loop.
    #[error("Consumer {consumer:?} unavailable on stream {stream:?}: {reason}")]
    ConsumerUnavailable {
        stream: String,
        consumer: String,
        reason: String,
    },

    /// A non-fatal broker error surfaced outside the pull loop.
    #[error("Broker error: {0}")]
    Broker(BrokerError),

    /// `listen()` was called while a pull loop is already running.
    #[error("A pull loop is already running for this listener")]
    AlreadyListening,

    /// The pull loop task ended abnormally (panic or abort).
    #[error("Pull loop task failed: {0}")]
    TaskFailed(String),
}

/// Delivery metadata handed to the handler alongside the envelope.
#[derive(Debug, Clone, Copy)]
pub struct MessageInfo {
    /// Position of the message in its stream.
    pub sequence: u64,
    /// Delivery attempt counter, 1 on first delivery. Greater than 1
    /// means this is a redelivery and the handler may have seen the
    /// message before.
    pub deliveries: u32,
}

/// Outcome of one [`Listener::fetch_messages`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub delivered: usize,
    pub acked: usize,
    pub nacked: usize,
}

/// Business handler invoked once per decoded envelope.
///
/// Returning an error negatively acknowledges the message; the broker
/// redelivers it after the ack window.
#[async_trait]
pub trait EventHandler<E: EventData>: Send + Sync + 'static {
    async fn on_event(&self, event: Event<E>, info: MessageInfo) -> anyhow::Result<()>;
}

/// Adapt an async closure into an [`EventHandler`], so per-subject
/// behavior is supplied as a function value.
pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn(f)
}

/// See [`handler_fn`].
pub struct HandlerFn<F>(F);

#[async_trait]
impl<E, F, Fut> EventHandler<E> for HandlerFn<F>
where
    E: EventData,
    F: Fn(Event<E>, MessageInfo) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
{
    async fn on_event(&self, event: Event<E>, info: MessageInfo) -> anyhow::Result<()> {
        (self.0)(event, info).await
    }
}

/// Consumes every durable message for one subject.
///
/// The broker-side consumer handle is resolved lazily, at most once,
/// and memoized for the lifetime of the instance. Consumption runs
/// either continuously ([`listen`](Listener::listen) spawns a
/// background pull loop) or on demand
/// ([`fetch_messages`](Listener::fetch_messages) drains one batch).
pub struct Listener<E: EventData, H: EventHandler<E>> {
    config: ConsumerConfig,
    session: Arc<dyn BrokerSession>,
    handler: Arc<H>,
    consumer: Mutex<Option<Arc<dyn BrokerConsumer>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<Result<(), ListenerError>>>>,
    _event: PhantomData<E>,
}

impl<E: EventData, H: EventHandler<E>> Listener<E, H> {
    pub fn new(config: ConsumerConfig, session: Arc<dyn BrokerSession>, handler: H) -> Self {
        Self {
            config,
            session,
            handler: Arc::new(handler),
            consumer: Mutex::new(None),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            _event: PhantomData,
        }
    }

    /// Resolve the broker-side consumer for this listener.
    ///
    /// Idempotent: the first call creates or resolves the consumer,
    /// later calls are no-ops. Fails with
    /// [`ListenerError::ConsumerUnavailable`] when the stream does not
    /// exist.
    pub async fn create_consumer(&self) -> Result<(), ListenerError> {
        self.resolve().await.map(|_| ())
    }

    /// Enter continuous consumption.
    ///
    /// Resolves the consumer (if not already bound), spawns the pull
    /// loop as a background task, and returns once the loop has
    /// started. The loop runs until [`stop`](Listener::stop) or an
    /// unrecoverable consumer-level error; its terminal result is
    /// observed through [`join`](Listener::join). A stopped listener
    /// is not restartable — construct a new one instead.
    pub async fn listen(&self) -> Result<(), ListenerError> {
        let consumer = self.resolve().await?;

        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(ListenerError::AlreadyListening);
        }

        let handler = Arc::clone(&self.handler);
        let config = self.config.clone();
        let cancel = self.cancel.clone();

        *task = Some(tokio::spawn(pull_loop::<E, H>(
            consumer, handler, config, cancel,
        )));

        tracing::info!(
            stream = %self.config.stream,
            consumer = %self.config.consumer,
            subject = %E::SUBJECT,
            "Listener started"
        );
        Ok(())
    }

    /// Pull and process one batch of at most `batch_size` messages.
    ///
    /// Each message goes through the same isolated
    /// decode → dispatch → ack/nak unit as the continuous loop, and
    /// the call returns once the batch is exhausted. Useful for
    /// controlled, on-demand draining.
    pub async fn fetch_messages(&self, batch_size: usize) -> Result<BatchSummary, ListenerError> {
        let consumer = self.resolve().await?;

        let batch = consumer
            .fetch(batch_size, self.config.ack_wait)
            .await
            .map_err(|e| fail(&self.config, e))?;

        let mut summary = BatchSummary {
            delivered: batch.len(),
            ..BatchSummary::default()
        };

        for message in &batch {
            if process_message::<E, H>(self.handler.as_ref(), message, &self.config).await {
                summary.acked += 1;
            } else {
                summary.nacked += 1;
            }
        }

        Ok(summary)
    }

    /// Signal the pull loop to cease issuing new fetches.
    ///
    /// Cooperative: an in-flight fetch or handler call runs to
    /// completion. Idempotent and safe in any state, including before
    /// [`listen`](Listener::listen) was ever called.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the pull loop to finish and return its terminal
    /// result.
    ///
    /// Returns `Ok(())` immediately when no loop was ever started.
    pub async fn join(&self) -> Result<(), ListenerError> {
        let handle = self.task.lock().await.take();
        match handle {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(ListenerError::TaskFailed(e.to_string())),
            },
            None => Ok(()),
        }
    }

    /// Get the memoized consumer handle, resolving it on first use.
    async fn resolve(&self) -> Result<Arc<dyn BrokerConsumer>, ListenerError> {
        let mut slot = self.consumer.lock().await;

        if let Some(consumer) = slot.as_ref() {
            return Ok(Arc::clone(consumer));
        }

        let consumer = self
            .session
            .resolve_consumer(
                &self.config.stream,
                &self.config.consumer,
                E::SUBJECT.as_str(),
                self.config.ack_wait,
            )
            .await
            .map_err(|e| fail(&self.config, e))?;

        tracing::info!(
            stream = %self.config.stream,
            consumer = %self.config.consumer,
            subject = %E::SUBJECT,
            "Consumer bound"
        );

        *slot = Some(Arc::clone(&consumer));
        Ok(consumer)
    }
}

/// Continuous pull loop: fetch → per-message decode/dispatch/ack →
/// repeat, until cancelled or the consumer becomes unavailable.
async fn pull_loop<E: EventData, H: EventHandler<E>>(
    consumer: Arc<dyn BrokerConsumer>,
    handler: Arc<H>,
    config: ConsumerConfig,
    cancel: CancellationToken,
) -> Result<(), ListenerError> {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            fetched = consumer.fetch(config.batch_size, config.ack_wait) => fetched,
        };

        match fetched {
            Ok(batch) => {
                for message in &batch {
                    process_message::<E, H>(handler.as_ref(), message, &config).await;
                }
            }
            Err(e) if is_fatal(&e) => {
                tracing::error!(
                    stream = %config.stream,
                    consumer = %config.consumer,
                    error = %e,
                    "Consumer unavailable, stopping pull loop"
                );
                return Err(fail(&config, e));
            }
            Err(e) => {
                tracing::warn!(
                    stream = %config.stream,
                    consumer = %config.consumer,
                    error = %e,
                    "Batch fetch failed, retrying"
                );
            }
        }
    }

    tracing::info!(
        stream = %config.stream,
        consumer = %config.consumer,
        "Pull loop stopped"
    );
    Ok(())
}

/// Process one delivered message in isolation. Returns `true` when the
/// message was acked.
async fn process_message<E: EventData, H: EventHandler<E>>(
    handler: &H,
    message: &DeliveredMessage,
    config: &ConsumerConfig,
) -> bool {
    let info = MessageInfo {
        sequence: message.sequence,
        deliveries: message.deliveries,
    };

    let outcome = match envelope::decode::<E>(&message.subject, &message.payload) {
        Ok(event) => handler.on_event(event, info).await,
        Err(e) => Err(anyhow::Error::new(e)),
    };

    match outcome {
        Ok(()) => {
            if let Err(e) = message.ack().await {
                tracing::warn!(
                    stream = %config.stream,
                    consumer = %config.consumer,
                    sequence = info.sequence,
                    error = %e,
                    "Failed to ack message"
                );
                return false;
            }
            true
        }
        Err(e) => {
            tracing::warn!(
                stream = %config.stream,
                consumer = %config.consumer,
                sequence = info.sequence,
                deliveries = info.deliveries,
                error = %e,
                "Message processing failed, will be redelivered"
            );
            if let Err(nak_err) = message.nak().await {
                tracing::warn!(
                    stream = %config.stream,
                    consumer = %config.consumer,
                    sequence = info.sequence,
                    error = %nak_err,
                    "Failed to nak message"
                );
            }
            false
        }
    }
}

/// Whether a broker error ends the pull loop.
fn is_fatal(e: &BrokerError) -> bool {
    matches!(
        e,
        BrokerError::StreamNotFound(_) | BrokerError::ConsumerDeleted { .. }
    )
}

/// Map a broker error to the listener taxonomy: stream/consumer
/// resolution failures become [`ListenerError::ConsumerUnavailable`].
fn fail(config: &ConsumerConfig, e: BrokerError) -> ListenerError {
    if is_fatal(&e) {
        ListenerError::ConsumerUnavailable {
            stream: config.stream.clone(),
            consumer: config.consumer.clone(),
            reason: e.to_string(),
        }
    } else {
        ListenerError::Broker(e)
    }
}
