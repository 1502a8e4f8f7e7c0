use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::permissions::{AccessChecker, Permission, Role};
use crate::OrgId;

const CANNOT_MANAGE: &str = "you must be an administrator of this organization to manage its members";

/// Outcome of a membership write that must leave the organization an
/// administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipWrite {
    Applied { previous: Option<Role> },
    /// Refused: the user is the organization's only administrator.
    LastAdmin,
    /// There was no association to remove.
    Missing,
}

/// Persistent role assignments, keyed by (user, organization).
#[async_trait]
pub trait MembershipStore: Send + Sync + 'static {
    async fn role_of(&self, user_id: Uuid, org_id: &OrgId) -> Result<Option<Role>>;

    /// Unguarded write, for seeding organizations.
    async fn upsert_association(&self, user_id: Uuid, org_id: &OrgId, role: Role) -> Result<()>;

    /// Creates or changes the association unless that demotes the last
    /// administrator. Check and write are one unit of work.
    async fn set_role_keeping_admin(
        &self,
        user_id: Uuid,
        org_id: &OrgId,
        role: Role,
    ) -> Result<MembershipWrite>;

    /// Removes the association unless it belongs to the last administrator.
    async fn remove_keeping_admin(&self, user_id: Uuid, org_id: &OrgId)
        -> Result<MembershipWrite>;

    async fn count_admins(&self, org_id: &OrgId) -> Result<i64>;
}

/// Grants the first administrator of an organization. Refused when the
/// organization already has one or the user is already a member, so every
/// later change goes through [`MembershipService`].
pub async fn bootstrap_admin(
    store: &dyn MembershipStore,
    user_id: Uuid,
    org_id: &OrgId,
) -> CoreResult<()> {
    if org_id.is_blank() {
        return Err(CoreError::InvalidInput(
            "organization id must not be blank".to_string(),
        ));
    }
    if let Some(role) = store.role_of(user_id, org_id).await? {
        return Err(CoreError::invalid_state(format!(
            "{user_id} is already {role} of {org_id}; use the members API instead"
        )));
    }
    if store.count_admins(org_id).await? > 0 {
        return Err(CoreError::invalid_state(format!(
            "{org_id} already has an administrator; use the members API instead"
        )));
    }
    store.upsert_association(user_id, org_id, Role::Admin).await?;
    info!(%org_id, %user_id, "first administrator granted");
    Ok(())
}

/// The only code path that mutates role assignments. Every successful
/// mutation invalidates the member's cached roles before returning.
#[derive(Clone)]
pub struct MembershipService {
    access: AccessChecker,
    store: Arc<dyn MembershipStore>,
}

impl MembershipService {
    pub fn new(access: AccessChecker, store: Arc<dyn MembershipStore>) -> Self {
        Self { access, store }
    }

    /// Creates the association or changes its role.
    pub async fn set_role(
        &self,
        actor_id: Uuid,
        org_id: &OrgId,
        user_id: Uuid,
        role: Role,
    ) -> CoreResult<()> {
        self.authorize_manager(actor_id, org_id).await?;

        let write = self
            .store
            .set_role_keeping_admin(user_id, org_id, role)
            .await?;
        let previous = settle(write, org_id, user_id)?;
        self.invalidate(user_id).await?;
        info!(%org_id, %user_id, %actor_id, ?previous, new_role = %role, "membership role set");
        Ok(())
    }

    pub async fn remove_member(
        &self,
        actor_id: Uuid,
        org_id: &OrgId,
        user_id: Uuid,
    ) -> CoreResult<()> {
        self.authorize_manager(actor_id, org_id).await?;

        let write = self.store.remove_keeping_admin(user_id, org_id).await?;
        let previous = settle(write, org_id, user_id)?;
        self.invalidate(user_id).await?;
        info!(%org_id, %user_id, %actor_id, ?previous, "member removed");
        Ok(())
    }

    async fn authorize_manager(&self, actor_id: Uuid, org_id: &OrgId) -> CoreResult<()> {
        self.access
            .authorize(
                actor_id,
                [org_id],
                Permission::CompanyCanManageMembers,
                CANNOT_MANAGE,
            )
            .await
            .map(|_| ())
    }

    async fn invalidate(&self, user_id: Uuid) -> CoreResult<()> {
        self.access.role_cache().invalidate(user_id).await?;
        Ok(())
    }
}

fn settle(write: MembershipWrite, org_id: &OrgId, user_id: Uuid) -> CoreResult<Option<Role>> {
    match write {
        MembershipWrite::Applied { previous } => Ok(previous),
        MembershipWrite::LastAdmin => Err(CoreError::invalid_state(format!(
            "{org_id} must keep at least one administrator"
        ))),
        MembershipWrite::Missing => Err(CoreError::not_found(
            "membership",
            format!("{user_id}@{org_id}"),
        )),
    }
}
