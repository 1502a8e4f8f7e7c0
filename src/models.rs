use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::documents::Document;
use crate::events::{Event, EventKind};
use crate::revision::{Approval, ApprovalStatus, RevisionRequest, RevisionStatus};
use crate::schema::*;
use crate::seal::{FieldValues, SignatureRecord};
use crate::OrgId;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = company_associations)]
#[diesel(primary_key(user_id, org_id))]
pub struct CompanyAssociation {
    pub user_id: Uuid,
    pub org_id: String,
    pub role: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = company_associations)]
pub struct NewCompanyAssociation<'a> {
    pub user_id: Uuid,
    pub org_id: &'a str,
    pub role: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = documents)]
pub struct DocumentRow {
    pub id: Uuid,
    pub family: String,
    pub fields: Value,
    pub signatures: Value,
    pub version: i32,
    pub is_deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocumentRow {
    pub id: Uuid,
    pub family: String,
    pub fields: Value,
    pub signatures: Value,
    pub version: i32,
    pub is_deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = revision_requests)]
#[diesel(belongs_to(DocumentRow, foreign_key = document_id))]
pub struct RevisionRequestRow {
    pub id: Uuid,
    pub document_id: Uuid,
    pub requester_org_id: String,
    pub authored_by: Uuid,
    pub content: Value,
    pub comment: Option<String>,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = revision_requests)]
pub struct NewRevisionRequestRow {
    pub id: Uuid,
    pub document_id: Uuid,
    pub requester_org_id: String,
    pub authored_by: Uuid,
    pub content: Value,
    pub comment: Option<String>,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = revision_approvals)]
#[diesel(belongs_to(RevisionRequestRow, foreign_key = revision_request_id))]
pub struct ApprovalRow {
    pub id: Uuid,
    pub revision_request_id: Uuid,
    pub position: i32,
    pub approver_org_id: String,
    pub approval_group: Option<i32>,
    pub status: String,
    pub comment: Option<String>,
    pub decided_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = revision_approvals)]
pub struct NewApprovalRow {
    pub id: Uuid,
    pub revision_request_id: Uuid,
    pub position: i32,
    pub approver_org_id: String,
    pub approval_group: Option<i32>,
    pub status: String,
    pub comment: Option<String>,
    pub decided_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = events)]
pub struct EventRow {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub actor: String,
    pub kind: String,
    pub data: Value,
    pub created_at: NaiveDateTime,
    /// Insertion order; events of one transition share a timestamp.
    pub seq: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = events)]
pub struct NewEventRow {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub actor: String,
    pub kind: String,
    pub data: Value,
    pub created_at: NaiveDateTime,
}

impl DocumentRow {
    pub fn into_domain(self) -> Result<Document> {
        let fields = match self.fields {
            Value::Object(map) => map,
            other => return Err(anyhow!("document {} has non-object fields: {other}", self.id)),
        };
        let signatures: SignatureRecord = serde_json::from_value(self.signatures)
            .with_context(|| format!("document {} has malformed signatures", self.id))?;
        Ok(Document {
            id: self.id,
            family: self.family,
            fields,
            signatures,
            version: self.version,
            is_deleted: self.is_deleted,
            created_at: self.created_at.and_utc(),
            updated_at: self.updated_at.and_utc(),
        })
    }
}

impl NewDocumentRow {
    pub fn from_domain(document: &Document) -> Result<Self> {
        Ok(Self {
            id: document.id,
            family: document.family.clone(),
            fields: Value::Object(document.fields.clone()),
            signatures: serde_json::to_value(&document.signatures)?,
            version: document.version,
            is_deleted: document.is_deleted,
            created_at: document.created_at.naive_utc(),
            updated_at: document.updated_at.naive_utc(),
        })
    }
}

impl RevisionRequestRow {
    pub fn into_domain(self, approvals: Vec<ApprovalRow>) -> Result<RevisionRequest> {
        let status = RevisionStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("revision {} has unknown status {}", self.id, self.status))?;
        let content: FieldValues = match self.content {
            Value::Object(map) => map,
            other => return Err(anyhow!("revision {} has non-object content: {other}", self.id)),
        };
        let approvals = approvals
            .into_iter()
            .map(ApprovalRow::into_domain)
            .collect::<Result<Vec<_>>>()?;
        Ok(RevisionRequest {
            id: self.id,
            document_id: self.document_id,
            requester_org_id: OrgId::from(self.requester_org_id),
            authored_by: self.authored_by,
            content,
            comment: self.comment,
            status,
            approvals,
            created_at: self.created_at.and_utc(),
            updated_at: self.updated_at.and_utc(),
        })
    }
}

impl NewRevisionRequestRow {
    pub fn from_domain(request: &RevisionRequest) -> Self {
        Self {
            id: request.id,
            document_id: request.document_id,
            requester_org_id: request.requester_org_id.to_string(),
            authored_by: request.authored_by,
            content: Value::Object(request.content.clone()),
            comment: request.comment.clone(),
            status: request.status.as_str().to_string(),
            created_at: request.created_at.naive_utc(),
            updated_at: request.updated_at.naive_utc(),
        }
    }
}

impl ApprovalRow {
    pub fn into_domain(self) -> Result<Approval> {
        let status = ApprovalStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("approval {} has unknown status {}", self.id, self.status))?;
        Ok(Approval {
            id: self.id,
            approver_org_id: OrgId::from(self.approver_org_id),
            group: self.approval_group,
            status,
            comment: self.comment,
            decided_at: self.decided_at.map(|at| at.and_utc()),
        })
    }
}

impl NewApprovalRow {
    pub fn from_domain(request_id: Uuid, position: usize, approval: &Approval) -> Self {
        Self {
            id: approval.id,
            revision_request_id: request_id,
            position: position as i32,
            approver_org_id: approval.approver_org_id.to_string(),
            approval_group: approval.group,
            status: approval.status.as_str().to_string(),
            comment: approval.comment.clone(),
            decided_at: approval.decided_at.map(|at| at.naive_utc()),
        }
    }
}

impl EventRow {
    pub fn into_domain(self) -> Result<Event> {
        let kind = EventKind::parse(&self.kind)
            .ok_or_else(|| anyhow!("event {} has unknown kind {}", self.id, self.kind))?;
        Ok(Event {
            id: self.id,
            stream_id: self.stream_id,
            actor: self.actor,
            kind,
            data: self.data,
            created_at: self.created_at.and_utc(),
        })
    }
}

impl From<&Event> for NewEventRow {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            stream_id: event.stream_id,
            actor: event.actor.clone(),
            kind: event.kind.as_str().to_string(),
            data: event.data.clone(),
            created_at: event.created_at.naive_utc(),
        }
    }
}
