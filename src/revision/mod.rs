//! Post-signature amendments to documents, approved by every other
//! stakeholder.

pub mod consensus;
pub mod service;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreResult;
use crate::events::Event;
use crate::seal::FieldValues;
use crate::OrgId;

pub use consensus::{apply, open, Decision, Draft, Outcome, Transition};
pub use service::{NewRevision, RevisionService};

pub const AUTO_APPROVAL_COMMENT: &str = "auto approval";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevisionStatus {
    Pending,
    Accepted,
    Refused,
    Canceled,
}

impl RevisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionStatus::Pending => "PENDING",
            RevisionStatus::Accepted => "ACCEPTED",
            RevisionStatus::Refused => "REFUSED",
            RevisionStatus::Canceled => "CANCELED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(RevisionStatus::Pending),
            "ACCEPTED" => Some(RevisionStatus::Accepted),
            "REFUSED" => Some(RevisionStatus::Refused),
            "CANCELED" => Some(RevisionStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RevisionStatus::Pending)
    }
}

impl fmt::Display for RevisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Accepted,
    Refused,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Accepted => "ACCEPTED",
            ApprovalStatus::Refused => "REFUSED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(ApprovalStatus::Pending),
            "ACCEPTED" => Some(ApprovalStatus::Accepted),
            "REFUSED" => Some(ApprovalStatus::Refused),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub id: Uuid,
    pub approver_org_id: OrgId,
    /// Set for organizations that approve together; members of one group
    /// share the same value.
    pub group: Option<i32>,
    pub status: ApprovalStatus,
    pub comment: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionRequest {
    pub id: Uuid,
    pub document_id: Uuid,
    pub requester_org_id: OrgId,
    pub authored_by: Uuid,
    pub content: FieldValues,
    pub comment: Option<String>,
    pub status: RevisionStatus,
    pub approvals: Vec<Approval>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RevisionRequest {
    pub fn approval_for(&self, org_id: &OrgId) -> Option<&Approval> {
        self.approvals
            .iter()
            .find(|approval| &approval.approver_org_id == org_id)
    }

    pub fn pending_approvers(&self) -> impl Iterator<Item = &OrgId> {
        self.approvals
            .iter()
            .filter(|approval| approval.status == ApprovalStatus::Pending)
            .map(|approval| &approval.approver_org_id)
    }

    /// Requester plus every approver.
    pub fn participants(&self) -> impl Iterator<Item = &OrgId> {
        std::iter::once(&self.requester_org_id)
            .chain(self.approvals.iter().map(|approval| &approval.approver_org_id))
    }
}

/// Writes `content` over `fields`, the way an accepted revision amends its
/// document.
pub fn apply_content(fields: &mut FieldValues, content: &FieldValues) {
    for (field, value) in content {
        fields.insert(field.clone(), value.clone());
    }
}

/// Persistence of revision requests, their approvals and event stream.
///
/// `insert_revision` and `transition` are units of work: when the stored
/// request ends up `Accepted`, its content is written onto the document in
/// the same unit. `transition` must be atomic per request; two callers
/// resolving the same approval yield one success and one `InvalidState`.
#[async_trait]
pub trait RevisionRepository: Send + Sync + 'static {
    async fn insert_revision(&self, request: &RevisionRequest, events: &[Event]) -> CoreResult<()>;

    async fn find_revision(&self, id: Uuid) -> Result<Option<RevisionRequest>>;

    async fn pending_revision_for(&self, document_id: Uuid) -> Result<Option<Uuid>>;

    async fn revisions_for_org(&self, org_id: &OrgId) -> Result<Vec<RevisionRequest>>;

    async fn transition(
        &self,
        id: Uuid,
        transition: &Transition,
        actor: &str,
    ) -> CoreResult<RevisionRequest>;

    async fn events(&self, stream_id: Uuid) -> Result<Vec<Event>>;
}
