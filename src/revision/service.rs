use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::{
    open, ApprovalStatus, Decision, Draft, RevisionRepository, RevisionRequest, Transition,
};
use crate::documents::DocumentService;
use crate::error::{CoreError, CoreResult};
use crate::events::Event;
use crate::permissions::{AccessChecker, Permission};
use crate::seal::{FieldValues, Stage};
use crate::OrgId;

const CANNOT_REVISE: &str = "you must belong to an organization of this document to revise it";
const CANNOT_READ: &str = "you are not allowed to access this revision";
const NOT_AN_APPROVER: &str = "you are not an approver of this revision";
const NOT_THE_REQUESTER: &str = "only the requesting organization can cancel a revision";

#[derive(Debug, Clone)]
pub struct NewRevision {
    pub content: FieldValues,
    pub comment: Option<String>,
    /// Organization to request on behalf of; any eligible stakeholder when
    /// absent.
    pub requester: Option<OrgId>,
}

#[derive(Clone)]
pub struct RevisionService {
    access: AccessChecker,
    documents: DocumentService,
    repo: Arc<dyn RevisionRepository>,
}

impl RevisionService {
    pub fn new(
        access: AccessChecker,
        documents: DocumentService,
        repo: Arc<dyn RevisionRepository>,
    ) -> Self {
        Self {
            access,
            documents,
            repo,
        }
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        document_id: Uuid,
        input: NewRevision,
    ) -> CoreResult<RevisionRequest> {
        let (document, family) = self.documents.load(document_id).await?;

        if input.content.is_empty() {
            return Err(CoreError::InvalidInput(
                "a revision must change at least one field".to_string(),
            ));
        }
        let unknown = family.unknown_fields(&input.content);
        if !unknown.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "unknown fields for {}: {}",
                family.name,
                unknown.join(", ")
            )));
        }

        let stakeholders = family.stakeholders(&document.fields);
        let candidates: Vec<OrgId> = match input.requester {
            Some(requester) if stakeholders.contains(&requester) => vec![requester],
            Some(_) => Vec::new(),
            None => stakeholders,
        };
        let requester = self
            .access
            .authorize(user_id, &candidates, Permission::BsdCanRevise, CANNOT_REVISE)
            .await?;

        if family.machine.stage(&document.signatures) == Stage::Initial {
            return Err(CoreError::invalid_state(
                "a document can only be revised after its first signature, edit it directly",
            ));
        }

        let changes_something = input.content.iter().any(|(field, value)| {
            family
                .machine
                .rule(field)
                .is_some_and(|rule| !rule.kind.same(document.fields.get(field), Some(value)))
        });
        if !changes_something {
            return Err(CoreError::InvalidInput(
                "the revision does not change any value of the document".to_string(),
            ));
        }

        if let Some(pending) = self.repo.pending_revision_for(document_id).await? {
            return Err(CoreError::invalid_state(format!(
                "revision {pending} is already pending on this document"
            )));
        }

        let approver_units: Vec<Vec<OrgId>> = family
            .approval_units(&document.fields)
            .into_iter()
            .filter(|unit| !unit.contains(&requester))
            .collect();

        let (request, events) = open(
            Draft {
                document_id,
                requester_org_id: requester,
                authored_by: user_id,
                approver_units,
                content: input.content,
                comment: input.comment,
            },
            Utc::now(),
        );
        self.repo.insert_revision(&request, &events).await?;

        info!(
            revision_id = %request.id,
            %document_id,
            requester = %request.requester_org_id,
            approvers = request.approvals.len(),
            status = %request.status,
            "revision requested"
        );
        Ok(request)
    }

    /// Records an approver's decision. `as_org` picks the approving
    /// organization when the user belongs to several.
    pub async fn decide(
        &self,
        user_id: Uuid,
        revision_id: Uuid,
        decision: Decision,
        comment: Option<String>,
        as_org: Option<OrgId>,
    ) -> CoreResult<RevisionRequest> {
        let request = self.find(revision_id).await?;
        if request.status.is_terminal() {
            return Err(CoreError::invalid_state(format!(
                "revision {revision_id} is already {}",
                request.status
            )));
        }

        // Pending approvers first; a user whose organization already decided
        // still resolves to it and gets the state error rather than a denial.
        let candidates: Vec<OrgId> = match as_org {
            Some(org) => vec![org],
            None => request
                .pending_approvers()
                .chain(
                    request
                        .approvals
                        .iter()
                        .filter(|approval| approval.status != ApprovalStatus::Pending)
                        .map(|approval| &approval.approver_org_id),
                )
                .cloned()
                .collect(),
        };
        let approver = self
            .access
            .authorize(user_id, &candidates, Permission::BsdCanRevise, NOT_AN_APPROVER)
            .await?;

        let updated = self
            .repo
            .transition(
                revision_id,
                &Transition::Decide {
                    approver: approver.clone(),
                    decision,
                    comment,
                },
                &user_id.to_string(),
            )
            .await?;

        info!(
            %revision_id,
            %approver,
            ?decision,
            status = %updated.status,
            "revision decision recorded"
        );
        Ok(updated)
    }

    pub async fn cancel(&self, user_id: Uuid, revision_id: Uuid) -> CoreResult<RevisionRequest> {
        let request = self.find(revision_id).await?;
        let requester = self
            .access
            .authorize(
                user_id,
                [&request.requester_org_id],
                Permission::BsdCanRevise,
                NOT_THE_REQUESTER,
            )
            .await?;

        let updated = self
            .repo
            .transition(
                revision_id,
                &Transition::Cancel { by: requester },
                &user_id.to_string(),
            )
            .await?;
        info!(%revision_id, %user_id, "revision canceled");
        Ok(updated)
    }

    pub async fn get(&self, user_id: Uuid, revision_id: Uuid) -> CoreResult<RevisionRequest> {
        let request = self.find(revision_id).await?;
        self.access
            .authorize(
                user_id,
                request.participants(),
                Permission::BsdCanRead,
                CANNOT_READ,
            )
            .await?;
        Ok(request)
    }

    /// Revisions the organization requested or has to approve.
    pub async fn list_for_org(
        &self,
        user_id: Uuid,
        org_id: &OrgId,
    ) -> CoreResult<Vec<RevisionRequest>> {
        self.access
            .authorize(
                user_id,
                [org_id],
                Permission::BsdCanList,
                "you are not a member of this organization",
            )
            .await?;
        Ok(self.repo.revisions_for_org(org_id).await?)
    }

    pub async fn events(&self, user_id: Uuid, revision_id: Uuid) -> CoreResult<Vec<Event>> {
        let request = self.get(user_id, revision_id).await?;
        Ok(self.repo.events(request.id).await?)
    }

    async fn find(&self, revision_id: Uuid) -> CoreResult<RevisionRequest> {
        self.repo
            .find_revision(revision_id)
            .await?
            .ok_or_else(|| CoreError::not_found("revision", revision_id))
    }
}
