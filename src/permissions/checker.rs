use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::catalog::{Permission, PermissionCatalog, Role};
use super::role_cache::{RoleCache, UserRoles};
use crate::error::{CoreError, CoreResult};
use crate::OrgId;

/// Decides whether a user may perform an action on behalf of one of a set of
/// candidate organizations.
#[derive(Clone)]
pub struct AccessChecker {
    catalog: Arc<PermissionCatalog>,
    roles: Arc<RoleCache>,
}

impl AccessChecker {
    pub fn new(catalog: PermissionCatalog, roles: Arc<RoleCache>) -> Self {
        Self {
            catalog: Arc::new(catalog),
            roles,
        }
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    pub fn role_cache(&self) -> &Arc<RoleCache> {
        &self.roles
    }

    pub async fn user_roles(&self, user_id: Uuid) -> CoreResult<UserRoles> {
        Ok(self.roles.get_roles(user_id).await?)
    }

    /// Returns the first candidate organization in which the user holds a role
    /// granting `permission`; fails with `Forbidden` carrying `message`
    /// otherwise.
    pub async fn authorize<'a, I>(
        &self,
        user_id: Uuid,
        org_ids: I,
        permission: Permission,
        message: &str,
    ) -> CoreResult<OrgId>
    where
        I: IntoIterator<Item = &'a OrgId>,
    {
        let candidates: Vec<&OrgId> = org_ids.into_iter().filter(|id| !id.is_blank()).collect();
        if candidates.is_empty() {
            warn!(%user_id, ?permission, "authorization without candidate organizations");
            return Err(forbidden(message, permission));
        }

        let roles = self.user_roles(user_id).await?;
        let authorized = authorize_with_roles(&self.catalog, &roles, candidates, permission, message);
        match &authorized {
            Ok(org_id) => debug!(%user_id, %org_id, ?permission, "authorized"),
            Err(_) => warn!(%user_id, ?permission, "authorization denied"),
        }
        authorized
    }

    pub async fn role_in(&self, user_id: Uuid, org_id: &OrgId) -> CoreResult<Option<Role>> {
        Ok(self.user_roles(user_id).await?.get(org_id).copied())
    }
}

/// Synchronous variant over already-loaded roles, for callers that check
/// several candidate sets against the same user.
pub fn authorize_with_roles<'a, I>(
    catalog: &PermissionCatalog,
    roles: &UserRoles,
    org_ids: I,
    permission: Permission,
    message: &str,
) -> CoreResult<OrgId>
where
    I: IntoIterator<Item = &'a OrgId>,
{
    org_ids
        .into_iter()
        .filter(|org_id| !org_id.is_blank())
        .find(|org_id| {
            roles
                .get(*org_id)
                .is_some_and(|role| catalog.can(*role, permission))
        })
        .cloned()
        .ok_or_else(|| forbidden(message, permission))
}

fn forbidden(message: &str, permission: Permission) -> CoreError {
    CoreError::Forbidden {
        message: message.to_string(),
        permission: Some(permission),
    }
}
