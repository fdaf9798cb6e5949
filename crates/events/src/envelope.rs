//! Typed event envelope and wire codec.
//!
//! On the wire a message is the UTF-8 JSON encoding of its payload,
//! published under the payload's subject. [`decode`] rebuilds the
//! typed [`Event`] on the consumer side and guards against a message
//! arriving under a subject that does not match the expected payload
//! type.

use fleetbus_core::{EventData, Subject};
use serde::{Deserialize, Serialize};

/// The unit of data flowing through the bus: a subject tag plus the
/// subject-specific payload.
///
/// Immutable once constructed; producers create one per domain
/// mutation and every consumer decodes its own copy independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<D> {
    pub subject: Subject,
    pub data: D,
}

impl<D: EventData> Event<D> {
    /// Wrap a payload in its envelope, stamping the payload's subject.
    pub fn new(data: D) -> Self {
        Self {
            subject: D::SUBJECT,
            data,
        }
    }
}

/// Why a delivered message could not be decoded into a typed envelope.
///
/// Decode failures are per-message processing failures: the listener
/// naks the message and moves on, it never tears down the pull loop.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The message arrived under a different subject than the payload
    /// type expects.
    #[error("Subject mismatch: expected {expected}, got {got:?}")]
    SubjectMismatch { expected: Subject, got: String },

    /// The payload bytes are not valid UTF-8.
    #[error("Payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// The payload text is not valid JSON for the expected shape.
    #[error("Payload does not match the subject's shape: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a payload to its wire bytes.
pub fn encode<D: EventData>(data: &D) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(data)
}

/// Decode raw delivered bytes into a typed envelope.
///
/// `subject` is the subject the broker delivered the message under;
/// it must equal the payload type's subject exactly.
pub fn decode<D: EventData>(subject: &str, payload: &[u8]) -> Result<Event<D>, DecodeError> {
    if subject != D::SUBJECT.as_str() {
        return Err(DecodeError::SubjectMismatch {
            expected: D::SUBJECT,
            got: subject.to_string(),
        });
    }

    let text = std::str::from_utf8(payload)?;
    let data = serde_json::from_str(text)?;

    Ok(Event {
        subject: D::SUBJECT,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use fleetbus_core::payload::TaskCreated;

    fn task() -> TaskCreated {
        TaskCreated {
            id: "t1".to_string(),
            version: 1,
            title: "Deliver parcel 42".to_string(),
            reward_cents: 1500,
        }
    }

    #[test]
    fn encode_then_decode_rebuilds_the_envelope() {
        let bytes = encode(&task()).unwrap();

        let event: Event<TaskCreated> = decode("task:created", &bytes).unwrap();
        assert_eq!(event.subject, Subject::TaskCreated);
        assert_eq!(event.data, task());
    }

    #[test]
    fn decode_rejects_a_foreign_subject() {
        let bytes = encode(&task()).unwrap();

        let err = decode::<TaskCreated>("robot:created", &bytes).unwrap_err();
        assert_matches!(
            err,
            DecodeError::SubjectMismatch { expected, got }
                if expected == Subject::TaskCreated && got == "robot:created"
        );
    }

    #[test]
    fn decode_rejects_non_utf8_payloads() {
        let err = decode::<TaskCreated>("task:created", &[0xff, 0xfe]).unwrap_err();
        assert_matches!(err, DecodeError::Utf8(_));
    }

    #[test]
    fn decode_rejects_mismatched_json_shapes() {
        let err = decode::<TaskCreated>("task:created", b"{\"id\":\"t1\"}").unwrap_err();
        assert_matches!(err, DecodeError::Json(_));
    }
}
