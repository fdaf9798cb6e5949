//! Fleet event-bus client library.
//!
//! This crate provides the building blocks every service uses to emit
//! and consume domain events over the shared streaming broker:
//!
//! - [`Event`] — the typed envelope flowing through the bus.
//! - [`Publisher`] — durable publish with broker acknowledgment, plus
//!   an optional best-effort real-time fan-out.
//! - [`Listener`] — durable consumer lifecycle and batched pull loop
//!   with per-message ack/nak.
//! - [`BrokerSession`] — the seam behind which the actual broker
//!   lives; [`InMemoryBroker`] is the in-process implementation used
//!   by tests and single-process deployments.
//! - [`realtime`] — the secondary low-latency transport used for
//!   fire-and-forget fan-out.

pub mod broker;
pub mod envelope;
pub mod listener;
pub mod memory;
pub mod publisher;
pub mod realtime;

pub use broker::{BrokerConsumer, BrokerError, BrokerSession, DeliveredMessage, MessageAck};
pub use envelope::{DecodeError, Event};
pub use listener::{
    handler_fn, BatchSummary, ConsumerConfig, EventHandler, Listener, ListenerError, MessageInfo,
};
pub use memory::InMemoryBroker;
pub use publisher::{PublishError, Publisher};
pub use realtime::{RealtimeError, RealtimeTransport, WsFanout};
