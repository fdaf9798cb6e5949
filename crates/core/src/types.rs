/// Entity identifiers are opaque strings assigned by the owning service.
pub type EntityId = String;

/// Monotonically increasing per-entity revision counter.
///
/// Consumers use it to reconcile duplicate or out-of-order deliveries
/// of events about the same entity.
pub type Version = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
