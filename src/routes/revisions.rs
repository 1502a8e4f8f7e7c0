use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::AppResult;
use crate::events::Event;
use crate::revision::{Decision, NewRevision, RevisionRequest};
use crate::seal::FieldValues;
use crate::state::AppState;
use crate::OrgId;

#[derive(Deserialize)]
pub struct CreateRevisionRequest {
    pub content: FieldValues,
    pub comment: Option<String>,
    pub requester_org_id: Option<OrgId>,
}

#[derive(Deserialize)]
pub struct DecisionRequest {
    pub decision: Decision,
    pub comment: Option<String>,
    /// Approving organization, when the user belongs to several approvers.
    pub org_id: Option<OrgId>,
}

#[derive(Serialize)]
pub struct RevisionResponse {
    pub revision: RevisionRequest,
}

#[derive(Serialize)]
pub struct RevisionListResponse {
    pub revisions: Vec<RevisionRequest>,
}

#[derive(Serialize)]
pub struct EventListResponse {
    pub events: Vec<Event>,
}

pub async fn create_revision(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<CreateRevisionRequest>,
) -> AppResult<(StatusCode, Json<RevisionResponse>)> {
    let revision = state
        .revisions
        .create(
            user.user_id,
            document_id,
            NewRevision {
                content: payload.content,
                comment: payload.comment,
                requester: payload.requester_org_id,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(RevisionResponse { revision })))
}

pub async fn get_revision(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RevisionResponse>> {
    let revision = state.revisions.get(user.user_id, id).await?;
    Ok(Json(RevisionResponse { revision }))
}

pub async fn decide_revision(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<DecisionRequest>,
) -> AppResult<Json<RevisionResponse>> {
    let revision = state
        .revisions
        .decide(
            user.user_id,
            id,
            payload.decision,
            payload.comment,
            payload.org_id,
        )
        .await?;
    Ok(Json(RevisionResponse { revision }))
}

pub async fn cancel_revision(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RevisionResponse>> {
    let revision = state.revisions.cancel(user.user_id, id).await?;
    Ok(Json(RevisionResponse { revision }))
}

pub async fn revision_events(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<EventListResponse>> {
    let events = state.revisions.events(user.user_id, id).await?;
    Ok(Json(EventListResponse { events }))
}

pub async fn list_org_revisions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(org_id): Path<OrgId>,
) -> AppResult<Json<RevisionListResponse>> {
    let revisions = state.revisions.list_for_org(user.user_id, &org_id).await?;
    Ok(Json(RevisionListResponse { revisions }))
}
