use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::AppResult;
use crate::permissions::Role;
use crate::state::AppState;
use crate::OrgId;

#[derive(Deserialize)]
pub struct SetMemberRoleRequest {
    pub role: Role,
}

pub async fn set_member_role(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((org_id, member_id)): Path<(OrgId, Uuid)>,
    Json(payload): Json<SetMemberRoleRequest>,
) -> AppResult<StatusCode> {
    state
        .memberships
        .set_role(user.user_id, &org_id, member_id, payload.role)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_member(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((org_id, member_id)): Path<(OrgId, Uuid)>,
) -> AppResult<StatusCode> {
    state
        .memberships
        .remove_member(user.user_id, &org_id, member_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
