use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::AppResult;
use crate::permissions::Role;
use crate::state::AppState;
use crate::OrgId;

#[derive(Serialize)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub name: String,
    pub roles: BTreeMap<OrgId, Role>,
}

/// The caller's identity and the organizations they act for.
pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<MeResponse>> {
    let roles = state.access.role_cache().get_roles(user.user_id).await?;
    Ok(Json(MeResponse {
        user_id: user.user_id,
        name: user.name,
        roles: roles.into_iter().collect(),
    }))
}
