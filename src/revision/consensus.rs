use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{
    Approval, ApprovalStatus, RevisionRequest, RevisionStatus, AUTO_APPROVAL_COMMENT,
};
use crate::error::{CoreError, CoreResult};
use crate::events::{Event, EventKind};
use crate::seal::FieldValues;
use crate::OrgId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Accept,
    Refuse,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Decide {
        approver: OrgId,
        decision: Decision,
        comment: Option<String>,
    },
    Cancel {
        by: OrgId,
    },
}

/// Everything needed to open a revision request.
#[derive(Debug, Clone)]
pub struct Draft {
    pub document_id: Uuid,
    pub requester_org_id: OrgId,
    pub authored_by: Uuid,
    /// Approvers grouped by approval unit; units of more than one
    /// organization are co-approvers.
    pub approver_units: Vec<Vec<OrgId>>,
    pub content: FieldValues,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub request: RevisionRequest,
    /// Ids of approvals that left `Pending` in this transition.
    pub decided: Vec<Uuid>,
    pub events: Vec<Event>,
}

/// Builds a new request with one pending approval per approver. Without
/// approvers the request is accepted on the spot.
pub fn open(draft: Draft, at: DateTime<Utc>) -> (RevisionRequest, Vec<Event>) {
    let approvals: Vec<Approval> = draft
        .approver_units
        .iter()
        .enumerate()
        .flat_map(|(index, unit)| {
            let group = (unit.len() > 1).then_some(index as i32);
            unit.iter().map(move |org| Approval {
                id: Uuid::new_v4(),
                approver_org_id: org.clone(),
                group,
                status: ApprovalStatus::Pending,
                comment: None,
                decided_at: None,
            })
        })
        .collect();

    let mut request = RevisionRequest {
        id: Uuid::new_v4(),
        document_id: draft.document_id,
        requester_org_id: draft.requester_org_id,
        authored_by: draft.authored_by,
        content: draft.content,
        comment: draft.comment,
        status: RevisionStatus::Pending,
        approvals,
        created_at: at,
        updated_at: at,
    };

    let actor = draft.authored_by.to_string();
    let mut events = vec![Event::new(
        request.id,
        &actor,
        EventKind::RevisionRequestCreated,
        json!({
            "document_id": request.document_id,
            "requester_org_id": request.requester_org_id,
            "approvers": request.approvals.iter().map(|a| &a.approver_org_id).collect::<Vec<_>>(),
            "content": request.content,
        }),
        at,
    )];

    request.status = derive_status(&request.approvals);
    if request.status == RevisionStatus::Accepted {
        events.push(closing_event(&request, &actor, at));
    }
    (request, events)
}

/// The single transition function of a revision request. The input is not
/// modified; the caller persists `Outcome` as one unit of work.
pub fn apply(
    request: &RevisionRequest,
    transition: &Transition,
    actor: &str,
    at: DateTime<Utc>,
) -> CoreResult<Outcome> {
    if request.status.is_terminal() {
        return Err(CoreError::invalid_state(format!(
            "revision {} is already {}",
            request.id, request.status
        )));
    }

    let mut next = request.clone();
    let mut decided = Vec::new();
    let mut events = Vec::new();

    match transition {
        Transition::Decide {
            approver,
            decision,
            comment,
        } => {
            let index = next
                .approvals
                .iter()
                .position(|approval| &approval.approver_org_id == approver)
                .ok_or_else(|| CoreError::NotApprover {
                    request_id: request.id,
                    org_id: approver.clone(),
                })?;
            if next.approvals[index].status != ApprovalStatus::Pending {
                return Err(CoreError::invalid_state(format!(
                    "{approver} has already decided on revision {}",
                    request.id
                )));
            }

            let status = match decision {
                Decision::Accept => ApprovalStatus::Accepted,
                Decision::Refuse => ApprovalStatus::Refused,
            };
            decide(&mut next.approvals[index], status, comment.clone(), at);
            decided.push(next.approvals[index].id);
            events.push(approval_event(request.id, actor, &next.approvals[index], false, at));

            if status == ApprovalStatus::Accepted {
                if let Some(group) = next.approvals[index].group {
                    for approval in next.approvals.iter_mut() {
                        if approval.group == Some(group) && approval.status == ApprovalStatus::Pending {
                            decide(
                                approval,
                                ApprovalStatus::Accepted,
                                Some(AUTO_APPROVAL_COMMENT.to_string()),
                                at,
                            );
                            decided.push(approval.id);
                            events.push(approval_event(request.id, actor, approval, true, at));
                        }
                    }
                }
            }
            next.status = derive_status(&next.approvals);
        }
        Transition::Cancel { by } => {
            if by != &request.requester_org_id {
                return Err(CoreError::forbidden(
                    "only the requesting organization can cancel a revision",
                ));
            }
            next.status = RevisionStatus::Canceled;
        }
    }

    next.updated_at = at;
    if next.status.is_terminal() {
        events.push(closing_event(&next, actor, at));
    }
    Ok(Outcome {
        request: next,
        decided,
        events,
    })
}

/// Any refusal vetoes; acceptance needs every approval, which an empty list
/// trivially has.
pub fn derive_status(approvals: &[Approval]) -> RevisionStatus {
    if approvals
        .iter()
        .any(|approval| approval.status == ApprovalStatus::Refused)
    {
        RevisionStatus::Refused
    } else if approvals
        .iter()
        .all(|approval| approval.status == ApprovalStatus::Accepted)
    {
        RevisionStatus::Accepted
    } else {
        RevisionStatus::Pending
    }
}

fn decide(
    approval: &mut Approval,
    status: ApprovalStatus,
    comment: Option<String>,
    at: DateTime<Utc>,
) {
    approval.status = status;
    approval.comment = comment;
    approval.decided_at = Some(at);
}

fn approval_event(
    request_id: Uuid,
    actor: &str,
    approval: &Approval,
    auto: bool,
    at: DateTime<Utc>,
) -> Event {
    let kind = match approval.status {
        ApprovalStatus::Refused => EventKind::RevisionApprovalRefused,
        _ => EventKind::RevisionApprovalAccepted,
    };
    Event::new(
        request_id,
        actor,
        kind,
        json!({
            "approval_id": approval.id,
            "approver_org_id": approval.approver_org_id,
            "comment": approval.comment,
            "auto": auto,
        }),
        at,
    )
}

fn closing_event(request: &RevisionRequest, actor: &str, at: DateTime<Utc>) -> Event {
    let kind = match request.status {
        RevisionStatus::Accepted => EventKind::RevisionRequestAccepted,
        RevisionStatus::Refused => EventKind::RevisionRequestRefused,
        _ => EventKind::RevisionRequestCanceled,
    };
    Event::new(
        request.id,
        actor,
        kind,
        json!({ "document_id": request.document_id, "status": request.status }),
        at,
    )
}
