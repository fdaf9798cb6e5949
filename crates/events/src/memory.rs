//! In-process broker implementation.
//!
//! [`InMemoryBroker`] implements the full [`BrokerSession`] contract —
//! durable streams, named consumers, batched pull, per-message
//! ack/nak, and timed redelivery — entirely in process memory. Tests
//! and single-process deployments use it in place of a real broker.
//!
//! Streams are provisioned through the administrative surface
//! ([`add_stream`](InMemoryBroker::add_stream)); the client-facing
//! traits never create streams on their own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::broker::{BrokerConsumer, BrokerError, BrokerSession, DeliveredMessage, MessageAck};

/// How often a waiting fetch re-checks for new or redeliverable
/// messages before its wait deadline passes.
const FETCH_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Shared-state broker living entirely in process memory.
///
/// Cloning is cheap and every clone observes the same streams and
/// consumers, so a single broker can be handed to any number of
/// publishers and listeners in the same process.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    streams: HashMap<String, StreamState>,
}

struct StreamState {
    /// Subjects captured by this stream.
    subjects: Vec<String>,
    /// Append-only message log; `sequence` is 1-based.
    log: Vec<StoredMessage>,
    consumers: HashMap<String, ConsumerState>,
}

struct StoredMessage {
    sequence: u64,
    subject: String,
    payload: Vec<u8>,
}

struct ConsumerState {
    /// Subject filter this consumer was bound with.
    subject: String,
    ack_wait: Duration,
    /// Next log sequence this consumer has not yet seen.
    next_sequence: u64,
    /// Delivered but unacknowledged messages.
    pending: HashMap<u64, PendingDelivery>,
}

struct PendingDelivery {
    redeliver_at: Instant,
    deliveries: u32,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision a stream capturing the given subjects.
    ///
    /// Idempotent: re-adding an existing stream leaves its log and
    /// consumers untouched.
    pub fn add_stream(&self, name: &str, subjects: &[&str]) {
        let mut state = self.lock();
        state
            .streams
            .entry(name.to_string())
            .or_insert_with(|| StreamState {
                subjects: subjects.iter().map(|s| s.to_string()).collect(),
                log: Vec::new(),
                consumers: HashMap::new(),
            });
    }

    /// Remove a consumer out from under any listener bound to it.
    ///
    /// Subsequent fetches through a stale handle fail with
    /// [`BrokerError::ConsumerDeleted`].
    pub fn delete_consumer(&self, stream: &str, consumer: &str) {
        let mut state = self.lock();
        if let Some(stream_state) = state.streams.get_mut(stream) {
            stream_state.consumers.remove(consumer);
        }
    }

    /// Names of the consumers currently registered on a stream.
    pub fn consumer_names(&self, stream: &str) -> Vec<String> {
        let state = self.lock();
        state
            .streams
            .get(stream)
            .map(|s| s.consumers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of messages durably stored in a stream's log.
    pub fn stream_len(&self, stream: &str) -> usize {
        let state = self.lock();
        state.streams.get(stream).map(|s| s.log.len()).unwrap_or(0)
    }

    /// Lock the shared state, recovering the guard if a holder
    /// panicked mid-update.
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BrokerSession for InMemoryBroker {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let mut state = self.lock();

        let stream = state
            .streams
            .values_mut()
            .find(|s| s.subjects.iter().any(|sub| sub == subject))
            .ok_or_else(|| {
                BrokerError::Rejected(format!("no stream is bound to subject {subject:?}"))
            })?;

        let sequence = stream.log.len() as u64 + 1;
        stream.log.push(StoredMessage {
            sequence,
            subject: subject.to_string(),
            payload,
        });

        Ok(())
    }

    async fn resolve_consumer(
        &self,
        stream: &str,
        consumer: &str,
        subject: &str,
        ack_wait: Duration,
    ) -> Result<Arc<dyn BrokerConsumer>, BrokerError> {
        let mut state = self.lock();

        let stream_state = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;

        // Re-resolving must not reset delivery position.
        stream_state
            .consumers
            .entry(consumer.to_string())
            .or_insert_with(|| ConsumerState {
                subject: subject.to_string(),
                ack_wait,
                next_sequence: 1,
                pending: HashMap::new(),
            });

        Ok(Arc::new(MemoryConsumer {
            broker: self.clone(),
            stream: stream.to_string(),
            consumer: consumer.to_string(),
        }))
    }
}

/// Handle for one named consumer on an [`InMemoryBroker`] stream.
struct MemoryConsumer {
    broker: InMemoryBroker,
    stream: String,
    consumer: String,
}

#[async_trait]
impl BrokerConsumer for MemoryConsumer {
    async fn fetch(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<DeliveredMessage>, BrokerError> {
        let deadline = Instant::now() + max_wait;

        loop {
            let batch = self.collect_batch(max_messages)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(FETCH_POLL_INTERVAL).await;
        }
    }
}

impl MemoryConsumer {
    /// One delivery pass: redeliverable pending messages first (in
    /// sequence order), then unseen log entries, up to `max_messages`.
    fn collect_batch(&self, max_messages: usize) -> Result<Vec<DeliveredMessage>, BrokerError> {
        let mut state = self.broker.lock();

        let stream_state = state
            .streams
            .get_mut(&self.stream)
            .ok_or_else(|| BrokerError::StreamNotFound(self.stream.clone()))?;
        let log_len = stream_state.log.len() as u64;

        let consumer = stream_state
            .consumers
            .get_mut(&self.consumer)
            .ok_or_else(|| BrokerError::ConsumerDeleted {
                stream: self.stream.clone(),
                consumer: self.consumer.clone(),
            })?;

        let now = Instant::now();
        let mut delivered: Vec<(u64, u32)> = Vec::new();

        let mut due: Vec<u64> = consumer
            .pending
            .iter()
            .filter(|(_, p)| p.redeliver_at <= now)
            .map(|(seq, _)| *seq)
            .collect();
        due.sort_unstable();

        for sequence in due.into_iter().take(max_messages) {
            // Entry is present: the sequence came from the same map
            // under the same lock.
            if let Some(pending) = consumer.pending.get_mut(&sequence) {
                pending.deliveries += 1;
                pending.redeliver_at = now + consumer.ack_wait;
                delivered.push((sequence, pending.deliveries));
            }
        }

        while delivered.len() < max_messages && consumer.next_sequence <= log_len {
            let sequence = consumer.next_sequence;
            consumer.next_sequence += 1;

            let stored = &stream_state.log[(sequence - 1) as usize];
            if stored.subject != consumer.subject {
                continue;
            }

            consumer.pending.insert(
                sequence,
                PendingDelivery {
                    redeliver_at: now + consumer.ack_wait,
                    deliveries: 1,
                },
            );
            delivered.push((sequence, 1));
        }

        let messages = delivered
            .into_iter()
            .map(|(sequence, deliveries)| {
                let stored = &stream_state.log[(sequence - 1) as usize];
                DeliveredMessage::new(
                    stored.subject.clone(),
                    stored.payload.clone(),
                    sequence,
                    deliveries,
                    Box::new(MemoryAcker {
                        broker: self.broker.clone(),
                        stream: self.stream.clone(),
                        consumer: self.consumer.clone(),
                        sequence,
                    }),
                )
            })
            .collect();

        Ok(messages)
    }
}

/// Ack channel for one delivered message.
struct MemoryAcker {
    broker: InMemoryBroker,
    stream: String,
    consumer: String,
    sequence: u64,
}

impl MemoryAcker {
    fn with_consumer<R>(
        &self,
        f: impl FnOnce(&mut ConsumerState) -> R,
    ) -> Result<R, BrokerError> {
        let mut state = self.broker.lock();
        let consumer = state
            .streams
            .get_mut(&self.stream)
            .and_then(|s| s.consumers.get_mut(&self.consumer))
            .ok_or_else(|| {
                BrokerError::Ack(format!(
                    "consumer {:?} no longer exists on stream {:?}",
                    self.consumer, self.stream
                ))
            })?;
        Ok(f(consumer))
    }
}

#[async_trait]
impl MessageAck for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.with_consumer(|consumer| {
            consumer.pending.remove(&self.sequence);
        })
    }

    async fn nak(&self) -> Result<(), BrokerError> {
        let sequence = self.sequence;
        self.with_consumer(|consumer| {
            // Redelivery becomes eligible one ack window after the nak.
            if let Some(pending) = consumer.pending.get_mut(&sequence) {
                pending.redeliver_at = Instant::now() + consumer.ack_wait;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const ACK_WAIT: Duration = Duration::from_millis(80);
    const FETCH_WAIT: Duration = Duration::from_millis(40);

    async fn consumer_on(
        broker: &InMemoryBroker,
        stream: &str,
        name: &str,
        subject: &str,
    ) -> Arc<dyn BrokerConsumer> {
        broker
            .resolve_consumer(stream, name, subject, ACK_WAIT)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn publish_without_a_covering_stream_is_rejected() {
        let broker = InMemoryBroker::new();

        let err = broker.publish("task:created", b"{}".to_vec()).await.unwrap_err();
        assert_matches!(err, BrokerError::Rejected(_));
    }

    #[tokio::test]
    async fn messages_are_delivered_in_log_order() {
        let broker = InMemoryBroker::new();
        broker.add_stream("tasks", &["task:created"]);
        let consumer = consumer_on(&broker, "tasks", "svc-a", "task:created").await;

        for n in 0..3u8 {
            broker.publish("task:created", vec![n]).await.unwrap();
        }

        let batch = consumer.fetch(10, FETCH_WAIT).await.unwrap();
        let payloads: Vec<u8> = batch.iter().map(|m| m.payload[0]).collect();
        assert_eq!(payloads, vec![0, 1, 2]);
        assert_eq!(batch[0].sequence, 1);
        assert_eq!(batch[0].deliveries, 1);
    }

    #[tokio::test]
    async fn fetch_caps_the_batch_and_does_not_double_deliver() {
        let broker = InMemoryBroker::new();
        broker.add_stream("tasks", &["task:created"]);
        let consumer = consumer_on(&broker, "tasks", "svc-a", "task:created").await;

        for n in 0..5u8 {
            broker.publish("task:created", vec![n]).await.unwrap();
        }

        let first = consumer.fetch(3, FETCH_WAIT).await.unwrap();
        assert_eq!(first.len(), 3);

        // The remaining two arrive next; the first three are pending
        // (inside their ack window), not redelivered.
        let second = consumer.fetch(3, FETCH_WAIT).await.unwrap();
        let payloads: Vec<u8> = second.iter().map(|m| m.payload[0]).collect();
        assert_eq!(payloads, vec![3, 4]);
    }

    #[tokio::test]
    async fn acked_messages_are_never_redelivered() {
        let broker = InMemoryBroker::new();
        broker.add_stream("tasks", &["task:created"]);
        let consumer = consumer_on(&broker, "tasks", "svc-a", "task:created").await;

        broker.publish("task:created", b"a".to_vec()).await.unwrap();

        let batch = consumer.fetch(10, FETCH_WAIT).await.unwrap();
        batch[0].ack().await.unwrap();

        tokio::time::sleep(ACK_WAIT + Duration::from_millis(20)).await;
        let batch = consumer.fetch(10, FETCH_WAIT).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn unacked_message_redelivers_after_the_ack_window() {
        let broker = InMemoryBroker::new();
        broker.add_stream("tasks", &["task:created"]);
        let consumer = consumer_on(&broker, "tasks", "svc-a", "task:created").await;

        broker.publish("task:created", b"a".to_vec()).await.unwrap();

        let first = consumer.fetch(10, FETCH_WAIT).await.unwrap();
        assert_eq!(first[0].deliveries, 1);
        // Neither acked nor naked: the ack window must elapse.

        tokio::time::sleep(ACK_WAIT + Duration::from_millis(20)).await;
        let second = consumer.fetch(10, FETCH_WAIT).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].sequence, first[0].sequence);
        assert_eq!(second[0].deliveries, 2);
    }

    #[tokio::test]
    async fn nak_restarts_the_redelivery_clock() {
        let broker = InMemoryBroker::new();
        broker.add_stream("tasks", &["task:created"]);
        let consumer = consumer_on(&broker, "tasks", "svc-a", "task:created").await;

        broker.publish("task:created", b"a".to_vec()).await.unwrap();

        let first = consumer.fetch(10, FETCH_WAIT).await.unwrap();
        first[0].nak().await.unwrap();

        // Inside the window nothing comes back.
        let empty = consumer.fetch(10, Duration::from_millis(20)).await.unwrap();
        assert!(empty.is_empty());

        tokio::time::sleep(ACK_WAIT).await;
        let second = consumer.fetch(10, FETCH_WAIT).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].deliveries, 2);
    }

    #[tokio::test]
    async fn resolving_an_existing_consumer_keeps_its_position() {
        let broker = InMemoryBroker::new();
        broker.add_stream("tasks", &["task:created"]);
        let consumer = consumer_on(&broker, "tasks", "svc-a", "task:created").await;

        broker.publish("task:created", b"a".to_vec()).await.unwrap();
        let batch = consumer.fetch(10, FETCH_WAIT).await.unwrap();
        batch[0].ack().await.unwrap();

        // Second resolve: same broker-side consumer, cursor intact.
        let again = consumer_on(&broker, "tasks", "svc-a", "task:created").await;
        assert_eq!(broker.consumer_names("tasks").len(), 1);

        let batch = again.fetch(10, FETCH_WAIT).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn fetch_through_a_deleted_consumer_fails() {
        let broker = InMemoryBroker::new();
        broker.add_stream("tasks", &["task:created"]);
        let consumer = consumer_on(&broker, "tasks", "svc-a", "task:created").await;

        broker.delete_consumer("tasks", "svc-a");

        let err = consumer.fetch(10, FETCH_WAIT).await.unwrap_err();
        assert_matches!(err, BrokerError::ConsumerDeleted { .. });
    }

    #[tokio::test]
    async fn consumers_only_see_their_subject() {
        let broker = InMemoryBroker::new();
        broker.add_stream("tasks", &["task:created", "task:updated"]);
        let created = consumer_on(&broker, "tasks", "svc-created", "task:created").await;

        broker.publish("task:updated", b"u".to_vec()).await.unwrap();
        broker.publish("task:created", b"c".to_vec()).await.unwrap();

        let batch = created.fetch(10, FETCH_WAIT).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].subject, "task:created");
    }

    #[tokio::test]
    async fn resolve_on_a_missing_stream_fails() {
        let broker = InMemoryBroker::new();

        let err = broker
            .resolve_consumer("ghosts", "svc-a", "task:created", ACK_WAIT)
            .await
            .err()
            .unwrap();
        assert_matches!(err, BrokerError::StreamNotFound(name) if name == "ghosts");
    }
}
