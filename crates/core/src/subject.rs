//! The closed set of event subjects used on the bus.
//!
//! Subject strings are the wire contract between producers and
//! consumers: both sides must agree on the exact value. Adding a new
//! subject is additive and backward compatible; renaming an existing
//! one is a breaking change that requires a coordinated deployment of
//! every service that publishes or listens on it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An event subject, serialized as its exact wire string
/// (e.g. `"task:created"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    #[serde(rename = "task:created")]
    TaskCreated,
    #[serde(rename = "task:updated")]
    TaskUpdated,
    #[serde(rename = "task:cancelled")]
    TaskCancelled,
    #[serde(rename = "robot:created")]
    RobotCreated,
    #[serde(rename = "robot:assigned")]
    RobotAssigned,
    #[serde(rename = "payment:scheduled")]
    PaymentScheduled,
}

impl Subject {
    /// Every known subject, in declaration order.
    pub const ALL: [Subject; 6] = [
        Subject::TaskCreated,
        Subject::TaskUpdated,
        Subject::TaskCancelled,
        Subject::RobotCreated,
        Subject::RobotAssigned,
        Subject::PaymentScheduled,
    ];

    /// The wire string for this subject.
    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::TaskCreated => "task:created",
            Subject::TaskUpdated => "task:updated",
            Subject::TaskCancelled => "task:cancelled",
            Subject::RobotCreated => "robot:created",
            Subject::RobotAssigned => "robot:assigned",
            Subject::PaymentScheduled => "payment:scheduled",
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a string that is not a known subject.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown subject: {0:?}")]
pub struct ParseSubjectError(pub String);

impl FromStr for Subject {
    type Err = ParseSubjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Subject::ALL
            .iter()
            .copied()
            .find(|subject| subject.as_str() == s)
            .ok_or_else(|| ParseSubjectError(s.to_string()))
    }
}
