use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::documents::{Document, DocumentRepository};
use crate::error::{CoreError, CoreResult};
use crate::events::Event;
use crate::membership::{MembershipStore, MembershipWrite};
use crate::permissions::{Role, RoleSource, UserRoles};
use crate::revision::{
    apply, apply_content, RevisionRepository, RevisionRequest, RevisionStatus, Transition,
};
use crate::seal::{FieldValues, SignatureRecord};
use crate::OrgId;

/// Process-local store implementing every repository contract. One lock
/// guards all tables, so each call is a unit of work.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    associations: HashMap<(Uuid, OrgId), Role>,
    documents: HashMap<Uuid, Document>,
    revisions: HashMap<Uuid, RevisionRequest>,
    events: Vec<Event>,
}

impl MemoryRepository {
    pub async fn grant(&self, user_id: Uuid, org_id: &OrgId, role: Role) {
        let mut state = self.state.lock().await;
        state.associations.insert((user_id, org_id.clone()), role);
    }

    pub async fn document(&self, id: Uuid) -> Option<Document> {
        let state = self.state.lock().await;
        state.documents.get(&id).cloned()
    }
}

impl MemoryState {
    fn admin_count(&self, org_id: &OrgId) -> usize {
        self.associations
            .iter()
            .filter(|((_, org), role)| org == org_id && **role == Role::Admin)
            .count()
    }

    fn amend_document(&mut self, request: &RevisionRequest) -> CoreResult<()> {
        let document = self
            .documents
            .get_mut(&request.document_id)
            .ok_or_else(|| CoreError::not_found("document", request.document_id))?;
        apply_content(&mut document.fields, &request.content);
        document.version += 1;
        document.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl RoleSource for MemoryRepository {
    async fn fetch_roles(&self, user_id: Uuid) -> Result<UserRoles> {
        let state = self.state.lock().await;
        Ok(state
            .associations
            .iter()
            .filter(|((user, _), _)| *user == user_id)
            .map(|((_, org), role)| (org.clone(), *role))
            .collect())
    }
}

#[async_trait]
impl MembershipStore for MemoryRepository {
    async fn role_of(&self, user_id: Uuid, org_id: &OrgId) -> Result<Option<Role>> {
        let state = self.state.lock().await;
        Ok(state.associations.get(&(user_id, org_id.clone())).copied())
    }

    async fn upsert_association(&self, user_id: Uuid, org_id: &OrgId, role: Role) -> Result<()> {
        self.grant(user_id, org_id, role).await;
        Ok(())
    }

    async fn set_role_keeping_admin(
        &self,
        user_id: Uuid,
        org_id: &OrgId,
        role: Role,
    ) -> Result<MembershipWrite> {
        let mut state = self.state.lock().await;
        let key = (user_id, org_id.clone());
        let previous = state.associations.get(&key).copied();
        if previous == Some(Role::Admin) && role != Role::Admin && state.admin_count(org_id) <= 1 {
            return Ok(MembershipWrite::LastAdmin);
        }
        state.associations.insert(key, role);
        Ok(MembershipWrite::Applied { previous })
    }

    async fn remove_keeping_admin(
        &self,
        user_id: Uuid,
        org_id: &OrgId,
    ) -> Result<MembershipWrite> {
        let mut state = self.state.lock().await;
        let key = (user_id, org_id.clone());
        let previous = match state.associations.get(&key) {
            Some(role) => *role,
            None => return Ok(MembershipWrite::Missing),
        };
        if previous == Role::Admin && state.admin_count(org_id) <= 1 {
            return Ok(MembershipWrite::LastAdmin);
        }
        state.associations.remove(&key);
        Ok(MembershipWrite::Applied {
            previous: Some(previous),
        })
    }

    async fn count_admins(&self, org_id: &OrgId) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state.admin_count(org_id) as i64)
    }
}

#[async_trait]
impl DocumentRepository for MemoryRepository {
    async fn insert_document(&self, document: &Document) -> Result<()> {
        let mut state = self.state.lock().await;
        state.documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<Document>> {
        let state = self.state.lock().await;
        Ok(state.documents.get(&id).cloned())
    }

    async fn save_document(
        &self,
        id: Uuid,
        expected_version: i32,
        fields: &FieldValues,
        signatures: &SignatureRecord,
    ) -> Result<Option<Document>> {
        let mut state = self.state.lock().await;
        let Some(document) = state.documents.get_mut(&id) else {
            return Ok(None);
        };
        if document.version != expected_version {
            return Ok(None);
        }
        document.fields = fields.clone();
        document.signatures = signatures.clone();
        document.version += 1;
        document.updated_at = Utc::now();
        Ok(Some(document.clone()))
    }
}

#[async_trait]
impl RevisionRepository for MemoryRepository {
    async fn insert_revision(&self, request: &RevisionRequest, events: &[Event]) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        let pending = state.revisions.values().any(|existing| {
            existing.document_id == request.document_id
                && existing.status == RevisionStatus::Pending
        });
        if pending && request.status == RevisionStatus::Pending {
            return Err(CoreError::invalid_state(
                "another revision is already pending on this document",
            ));
        }

        if request.status == RevisionStatus::Accepted {
            state.amend_document(request)?;
        }
        state.revisions.insert(request.id, request.clone());
        state.events.extend(events.iter().cloned());
        Ok(())
    }

    async fn find_revision(&self, id: Uuid) -> Result<Option<RevisionRequest>> {
        let state = self.state.lock().await;
        Ok(state.revisions.get(&id).cloned())
    }

    async fn pending_revision_for(&self, document_id: Uuid) -> Result<Option<Uuid>> {
        let state = self.state.lock().await;
        Ok(state
            .revisions
            .values()
            .find(|request| {
                request.document_id == document_id && request.status == RevisionStatus::Pending
            })
            .map(|request| request.id))
    }

    async fn revisions_for_org(&self, org_id: &OrgId) -> Result<Vec<RevisionRequest>> {
        let state = self.state.lock().await;
        let mut requests: Vec<RevisionRequest> = state
            .revisions
            .values()
            .filter(|request| request.participants().any(|org| org == org_id))
            .cloned()
            .collect();
        requests.sort_by_key(|request| request.created_at);
        Ok(requests)
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: &Transition,
        actor: &str,
    ) -> CoreResult<RevisionRequest> {
        let mut state = self.state.lock().await;
        let current = state
            .revisions
            .get(&id)
            .ok_or_else(|| CoreError::not_found("revision", id))?;
        let outcome = apply(current, transition, actor, Utc::now())?;

        if outcome.request.status == RevisionStatus::Accepted {
            state.amend_document(&outcome.request)?;
        }
        state.revisions.insert(id, outcome.request.clone());
        state.events.extend(outcome.events);
        Ok(outcome.request)
    }

    async fn events(&self, stream_id: Uuid) -> Result<Vec<Event>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|event| event.stream_id == stream_id)
            .cloned()
            .collect())
    }
}
