use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    RevisionRequestCreated,
    RevisionApprovalAccepted,
    RevisionApprovalRefused,
    RevisionRequestAccepted,
    RevisionRequestRefused,
    RevisionRequestCanceled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RevisionRequestCreated => "RevisionRequestCreated",
            EventKind::RevisionApprovalAccepted => "RevisionApprovalAccepted",
            EventKind::RevisionApprovalRefused => "RevisionApprovalRefused",
            EventKind::RevisionRequestAccepted => "RevisionRequestAccepted",
            EventKind::RevisionRequestRefused => "RevisionRequestRefused",
            EventKind::RevisionRequestCanceled => "RevisionRequestCanceled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            EventKind::RevisionRequestCreated,
            EventKind::RevisionApprovalAccepted,
            EventKind::RevisionApprovalRefused,
            EventKind::RevisionRequestAccepted,
            EventKind::RevisionRequestRefused,
            EventKind::RevisionRequestCanceled,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == value)
    }
}

/// Append-only audit entry. `stream_id` is the revision request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub actor: String,
    pub kind: EventKind,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(stream_id: Uuid, actor: &str, kind: EventKind, data: Value, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream_id,
            actor: actor.to_string(),
            kind,
            data,
            created_at: at,
        }
    }
}
