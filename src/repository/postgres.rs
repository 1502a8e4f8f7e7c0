use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::db::PgPool;
use crate::documents::{Document, DocumentRepository};
use crate::error::{CoreError, CoreResult};
use crate::events::Event;
use crate::membership::{MembershipStore, MembershipWrite};
use crate::models::{
    ApprovalRow, CompanyAssociation, DocumentRow, EventRow, NewApprovalRow,
    NewCompanyAssociation, NewDocumentRow, NewEventRow, NewRevisionRequestRow, RevisionRequestRow,
};
use crate::permissions::{Role, RoleSource, UserRoles};
use crate::revision::{
    apply, apply_content, ApprovalStatus, RevisionRepository, RevisionRequest, RevisionStatus,
    Transition,
};
use crate::schema::{company_associations, documents, events, revision_approvals, revision_requests};
use crate::seal::{FieldValues, SignatureRecord};
use crate::OrgId;

/// Diesel-backed implementation of every repository contract. Blocking
/// diesel calls run on the blocking thread pool.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_conn<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut PgConnection) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<anyhow::Error> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .map_err(|err| anyhow!("database task panicked: {err}"))?
    }
}

fn load_revision(conn: &mut PgConnection, id: Uuid, lock: bool) -> CoreResult<RevisionRequest> {
    let query = revision_requests::table.find(id);
    let row: Option<RevisionRequestRow> = if lock {
        query.for_update().first(conn).optional()?
    } else {
        query.first(conn).optional()?
    };
    let row = row.ok_or_else(|| CoreError::not_found("revision", id))?;

    let approvals: Vec<ApprovalRow> = revision_approvals::table
        .filter(revision_approvals::revision_request_id.eq(id))
        .order(revision_approvals::position.asc())
        .load(conn)?;
    Ok(row.into_domain(approvals)?)
}

fn insert_events(conn: &mut PgConnection, events: &[Event]) -> QueryResult<()> {
    if events.is_empty() {
        return Ok(());
    }
    let rows: Vec<NewEventRow> = events.iter().map(NewEventRow::from).collect();
    diesel::insert_into(events::table)
        .values(&rows)
        .execute(conn)?;
    Ok(())
}

/// Writes an accepted revision's content onto its document under a row lock.
fn amend_document(conn: &mut PgConnection, request: &RevisionRequest) -> CoreResult<()> {
    let row: DocumentRow = documents::table
        .find(request.document_id)
        .for_update()
        .first(conn)
        .optional()?
        .ok_or_else(|| CoreError::not_found("document", request.document_id))?;
    let mut document = row.into_domain()?;
    apply_content(&mut document.fields, &request.content);

    diesel::update(documents::table.find(document.id))
        .set((
            documents::fields.eq(Value::Object(document.fields)),
            documents::version.eq(document.version + 1),
            documents::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

fn pending_conflict(err: DieselError) -> CoreError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            CoreError::invalid_state("another revision is already pending on this document")
        }
        other => other.into(),
    }
}

#[async_trait]
impl RoleSource for PgRepository {
    async fn fetch_roles(&self, user_id: Uuid) -> Result<UserRoles> {
        self.with_conn(move |conn| {
            let rows: Vec<CompanyAssociation> = company_associations::table
                .filter(company_associations::user_id.eq(user_id))
                .load(conn)
                .context("failed to load company associations")?;
            rows.into_iter()
                .map(|row| -> Result<(OrgId, Role)> {
                    let role = Role::from_str(&row.role).map_err(|err| anyhow!(err))?;
                    Ok((OrgId::from(row.org_id), role))
                })
                .collect()
        })
        .await
    }
}

fn upsert_association_row(
    conn: &mut PgConnection,
    user_id: Uuid,
    org_id: &str,
    role: Role,
) -> QueryResult<usize> {
    let row = NewCompanyAssociation {
        user_id,
        org_id,
        role: role.as_str(),
    };
    diesel::insert_into(company_associations::table)
        .values(&row)
        .on_conflict((company_associations::user_id, company_associations::org_id))
        .do_update()
        .set((
            company_associations::role.eq(role.as_str()),
            company_associations::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
}

/// Locks the organization's administrator rows, in a stable order, followed
/// by the user's own row. Concurrent guarded writes on one organization
/// serialize here and each sees the others' committed demotions.
fn lock_for_admin_guard(
    conn: &mut PgConnection,
    user_id: Uuid,
    org_id: &str,
) -> Result<(usize, Option<Role>)> {
    let admins: Vec<Uuid> = company_associations::table
        .filter(company_associations::org_id.eq(org_id))
        .filter(company_associations::role.eq(Role::Admin.as_str()))
        .order(company_associations::user_id.asc())
        .select(company_associations::user_id)
        .for_update()
        .load(conn)
        .context("failed to lock administrators")?;
    let current: Option<String> = company_associations::table
        .find((user_id, org_id))
        .select(company_associations::role)
        .for_update()
        .first(conn)
        .optional()
        .context("failed to lock company association")?;
    let current = current
        .map(|role| Role::from_str(&role).map_err(|err| anyhow!(err)))
        .transpose()?;
    Ok((admins.len(), current))
}

#[async_trait]
impl MembershipStore for PgRepository {
    async fn role_of(&self, user_id: Uuid, org_id: &OrgId) -> Result<Option<Role>> {
        let org_id = org_id.to_string();
        self.with_conn(move |conn| {
            let role: Option<String> = company_associations::table
                .find((user_id, org_id))
                .select(company_associations::role)
                .first(conn)
                .optional()
                .context("failed to load company association")?;
            role.map(|role| Role::from_str(&role).map_err(|err| anyhow!(err)))
                .transpose()
        })
        .await
    }

    async fn upsert_association(&self, user_id: Uuid, org_id: &OrgId, role: Role) -> Result<()> {
        let org_id = org_id.to_string();
        self.with_conn(move |conn| {
            upsert_association_row(conn, user_id, &org_id, role)
                .context("failed to upsert company association")?;
            Ok(())
        })
        .await
    }

    async fn set_role_keeping_admin(
        &self,
        user_id: Uuid,
        org_id: &OrgId,
        role: Role,
    ) -> Result<MembershipWrite> {
        let org_id = org_id.to_string();
        self.with_conn(move |conn| {
            conn.transaction::<_, anyhow::Error, _>(|conn| {
                let (admins, previous) = lock_for_admin_guard(conn, user_id, &org_id)?;
                if previous == Some(Role::Admin) && role != Role::Admin && admins <= 1 {
                    return Ok(MembershipWrite::LastAdmin);
                }
                upsert_association_row(conn, user_id, &org_id, role)
                    .context("failed to upsert company association")?;
                Ok(MembershipWrite::Applied { previous })
            })
        })
        .await
    }

    async fn remove_keeping_admin(
        &self,
        user_id: Uuid,
        org_id: &OrgId,
    ) -> Result<MembershipWrite> {
        let org_id = org_id.to_string();
        self.with_conn(move |conn| {
            conn.transaction::<_, anyhow::Error, _>(|conn| {
                let (admins, previous) = lock_for_admin_guard(conn, user_id, &org_id)?;
                let Some(previous) = previous else {
                    return Ok(MembershipWrite::Missing);
                };
                if previous == Role::Admin && admins <= 1 {
                    return Ok(MembershipWrite::LastAdmin);
                }
                diesel::delete(company_associations::table.find((user_id, org_id.as_str())))
                    .execute(conn)
                    .context("failed to delete company association")?;
                Ok(MembershipWrite::Applied {
                    previous: Some(previous),
                })
            })
        })
        .await
    }

    async fn count_admins(&self, org_id: &OrgId) -> Result<i64> {
        let org_id = org_id.to_string();
        self.with_conn(move |conn| {
            company_associations::table
                .filter(company_associations::org_id.eq(org_id))
                .filter(company_associations::role.eq(Role::Admin.as_str()))
                .count()
                .get_result(conn)
                .context("failed to count administrators")
        })
        .await
    }
}

#[async_trait]
impl DocumentRepository for PgRepository {
    async fn insert_document(&self, document: &Document) -> Result<()> {
        let row = NewDocumentRow::from_domain(document)?;
        self.with_conn(move |conn| {
            diesel::insert_into(documents::table)
                .values(&row)
                .execute(conn)
                .context("failed to insert document")?;
            Ok(())
        })
        .await
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<Document>> {
        self.with_conn(move |conn| {
            let row: Option<DocumentRow> = documents::table
                .find(id)
                .first(conn)
                .optional()
                .context("failed to load document")?;
            row.map(DocumentRow::into_domain).transpose()
        })
        .await
    }

    async fn save_document(
        &self,
        id: Uuid,
        expected_version: i32,
        fields: &FieldValues,
        signatures: &SignatureRecord,
    ) -> Result<Option<Document>> {
        let fields = Value::Object(fields.clone());
        let signatures = serde_json::to_value(signatures)?;
        self.with_conn(move |conn| {
            let row: Option<DocumentRow> = diesel::update(
                documents::table
                    .filter(documents::id.eq(id))
                    .filter(documents::version.eq(expected_version)),
            )
            .set((
                documents::fields.eq(fields),
                documents::signatures.eq(signatures),
                documents::version.eq(expected_version + 1),
                documents::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result(conn)
            .optional()
            .context("failed to save document")?;
            row.map(DocumentRow::into_domain).transpose()
        })
        .await
    }
}

#[async_trait]
impl RevisionRepository for PgRepository {
    async fn insert_revision(&self, request: &RevisionRequest, events: &[Event]) -> CoreResult<()> {
        let request = request.clone();
        let events = events.to_vec();
        self.with_conn(move |conn| {
            conn.transaction::<_, CoreError, _>(|conn| {
                diesel::insert_into(revision_requests::table)
                    .values(&NewRevisionRequestRow::from_domain(&request))
                    .execute(conn)
                    .map_err(pending_conflict)?;

                let approvals: Vec<NewApprovalRow> = request
                    .approvals
                    .iter()
                    .enumerate()
                    .map(|(position, approval)| {
                        NewApprovalRow::from_domain(request.id, position, approval)
                    })
                    .collect();
                if !approvals.is_empty() {
                    diesel::insert_into(revision_approvals::table)
                        .values(&approvals)
                        .execute(conn)?;
                }

                insert_events(conn, &events)?;
                if request.status == RevisionStatus::Accepted {
                    amend_document(conn, &request)?;
                }
                Ok(())
            })
        })
        .await
    }

    async fn find_revision(&self, id: Uuid) -> Result<Option<RevisionRequest>> {
        self.with_conn(move |conn| match load_revision(conn, id, false) {
            Ok(request) => Ok(Some(request)),
            Err(CoreError::NotFound { .. }) => Ok(None),
            Err(CoreError::Infrastructure(err)) => Err(err),
            Err(other) => Err(anyhow!(other.to_string())),
        })
        .await
    }

    async fn pending_revision_for(&self, document_id: Uuid) -> Result<Option<Uuid>> {
        self.with_conn(move |conn| {
            revision_requests::table
                .filter(revision_requests::document_id.eq(document_id))
                .filter(revision_requests::status.eq(RevisionStatus::Pending.as_str()))
                .select(revision_requests::id)
                .first(conn)
                .optional()
                .context("failed to look up pending revisions")
        })
        .await
    }

    async fn revisions_for_org(&self, org_id: &OrgId) -> Result<Vec<RevisionRequest>> {
        let org_id = org_id.to_string();
        self.with_conn(move |conn| {
            let approving = revision_approvals::table
                .filter(revision_approvals::approver_org_id.eq(org_id.clone()))
                .select(revision_approvals::revision_request_id);
            let rows: Vec<RevisionRequestRow> = revision_requests::table
                .filter(
                    revision_requests::requester_org_id
                        .eq(org_id)
                        .or(revision_requests::id.eq_any(approving)),
                )
                .order(revision_requests::created_at.asc())
                .load(conn)
                .context("failed to load revisions")?;

            let approvals: Vec<ApprovalRow> = ApprovalRow::belonging_to(&rows)
                .order(revision_approvals::position.asc())
                .load(conn)
                .context("failed to load approvals")?;
            approvals
                .grouped_by(&rows)
                .into_iter()
                .zip(rows)
                .map(|(approvals, row)| row.into_domain(approvals))
                .collect()
        })
        .await
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: &Transition,
        actor: &str,
    ) -> CoreResult<RevisionRequest> {
        let transition = transition.clone();
        let actor = actor.to_string();
        self.with_conn(move |conn| {
            conn.transaction::<_, CoreError, _>(|conn| {
                let current = load_revision(conn, id, true)?;
                let outcome = apply(&current, &transition, &actor, Utc::now())?;
                let next = &outcome.request;

                for approval in next
                    .approvals
                    .iter()
                    .filter(|approval| outcome.decided.contains(&approval.id))
                {
                    let updated = diesel::update(
                        revision_approvals::table
                            .filter(revision_approvals::id.eq(approval.id))
                            .filter(
                                revision_approvals::status.eq(ApprovalStatus::Pending.as_str()),
                            ),
                    )
                    .set((
                        revision_approvals::status.eq(approval.status.as_str()),
                        revision_approvals::comment.eq(approval.comment.clone()),
                        revision_approvals::decided_at
                            .eq(approval.decided_at.map(|at| at.naive_utc())),
                    ))
                    .execute(conn)?;
                    if updated == 0 {
                        return Err(CoreError::invalid_state(format!(
                            "{} has already decided on revision {id}",
                            approval.approver_org_id
                        )));
                    }
                }

                let updated = diesel::update(
                    revision_requests::table
                        .filter(revision_requests::id.eq(id))
                        .filter(revision_requests::status.eq(RevisionStatus::Pending.as_str())),
                )
                .set((
                    revision_requests::status.eq(next.status.as_str()),
                    revision_requests::updated_at.eq(next.updated_at.naive_utc()),
                ))
                .execute(conn)?;
                if updated == 0 {
                    return Err(CoreError::invalid_state(format!(
                        "revision {id} is no longer pending"
                    )));
                }

                insert_events(conn, &outcome.events)?;
                if next.status == RevisionStatus::Accepted {
                    amend_document(conn, next)?;
                }
                debug!(revision_id = %id, status = %next.status, "revision transition stored");
                Ok(outcome.request)
            })
        })
        .await
    }

    async fn events(&self, stream_id: Uuid) -> Result<Vec<Event>> {
        self.with_conn(move |conn| {
            let rows: Vec<EventRow> = events::table
                .filter(events::stream_id.eq(stream_id))
                .order(events::seq.asc())
                .load(conn)
                .context("failed to load events")?;
            rows.into_iter().map(EventRow::into_domain).collect()
        })
        .await
    }
}
