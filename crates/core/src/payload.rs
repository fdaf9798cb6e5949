//! Typed payload shapes for each subject.
//!
//! Every payload carries at least the entity's `id` and its
//! monotonically increasing `version`; consumers rely on the pair to
//! reconcile redelivered or out-of-order events. Deletion-style
//! payloads ([`TaskCancelled`]) carry only those two fields.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::subject::Subject;
use crate::types::{EntityId, Timestamp, Version};

/// Binds a payload type to the subject it is published under.
///
/// One payload type per subject. The constant lets publishers and
/// listeners stay generic over the payload while the subject is fixed
/// at compile time.
pub trait EventData:
    Serialize + DeserializeOwned + std::fmt::Debug + Send + Sync + 'static
{
    /// Subject this payload is published under.
    const SUBJECT: Subject;
}

/// A new delivery task was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCreated {
    pub id: EntityId,
    pub version: Version,
    pub title: String,
    /// Reward offered for completing the task, in cents.
    pub reward_cents: i64,
}

impl EventData for TaskCreated {
    const SUBJECT: Subject = Subject::TaskCreated;
}

/// An existing task's details changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdated {
    pub id: EntityId,
    pub version: Version,
    pub title: String,
    pub reward_cents: i64,
}

impl EventData for TaskUpdated {
    const SUBJECT: Subject = Subject::TaskUpdated;
}

/// A task was cancelled. Carries only identifier + version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCancelled {
    pub id: EntityId,
    pub version: Version,
}

impl EventData for TaskCancelled {
    const SUBJECT: Subject = Subject::TaskCancelled;
}

/// A robot was registered with the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotCreated {
    pub id: EntityId,
    pub version: Version,
    pub name: String,
}

impl EventData for RobotCreated {
    const SUBJECT: Subject = Subject::RobotCreated;
}

/// A robot was assigned to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotAssigned {
    /// The robot's id.
    pub id: EntityId,
    pub version: Version,
    pub task_id: EntityId,
}

impl EventData for RobotAssigned {
    const SUBJECT: Subject = Subject::RobotAssigned;
}

/// A payment for a completed task was scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentScheduled {
    /// The payment's id.
    pub id: EntityId,
    pub version: Version,
    pub task_id: EntityId,
    pub amount_cents: i64,
    pub scheduled_at: Timestamp,
}

impl EventData for PaymentScheduled {
    const SUBJECT: Subject = Subject::PaymentScheduled;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads_are_bound_to_their_subjects() {
        assert_eq!(TaskCreated::SUBJECT, Subject::TaskCreated);
        assert_eq!(TaskUpdated::SUBJECT, Subject::TaskUpdated);
        assert_eq!(TaskCancelled::SUBJECT, Subject::TaskCancelled);
        assert_eq!(RobotCreated::SUBJECT, Subject::RobotCreated);
        assert_eq!(RobotAssigned::SUBJECT, Subject::RobotAssigned);
        assert_eq!(PaymentScheduled::SUBJECT, Subject::PaymentScheduled);
    }

    #[test]
    fn task_created_serializes_with_stable_field_names() {
        let data = TaskCreated {
            id: "t1".to_string(),
            version: 1,
            title: "Deliver parcel 42".to_string(),
            reward_cents: 1500,
        };

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["id"], "t1");
        assert_eq!(json["version"], 1);
        assert_eq!(json["title"], "Deliver parcel 42");
        assert_eq!(json["reward_cents"], 1500);
    }

    #[test]
    fn cancelled_payload_is_id_and_version_only() {
        let json = serde_json::to_value(TaskCancelled {
            id: "t9".to_string(),
            version: 3,
        })
        .unwrap();

        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2);
    }
}
