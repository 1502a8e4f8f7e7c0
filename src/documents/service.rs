use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::{Document, DocumentFamily, DocumentRepository, FamilyRegistry};
use crate::error::{CoreError, CoreResult};
use crate::permissions::{AccessChecker, Permission};
use crate::seal::{FieldValues, SignatureRecord};
use crate::OrgId;

const CANNOT_READ: &str = "you are not allowed to access this document";
const CANNOT_CREATE: &str =
    "you cannot create a document on which your organization does not appear";
const CANNOT_UPDATE: &str = "you are not allowed to update this document";
const CANNOT_REMOVE_SELF: &str =
    "you cannot remove your own organization from this document";

#[derive(Clone)]
pub struct DocumentService {
    access: AccessChecker,
    families: Arc<FamilyRegistry>,
    repo: Arc<dyn DocumentRepository>,
}

impl DocumentService {
    pub fn new(
        access: AccessChecker,
        families: Arc<FamilyRegistry>,
        repo: Arc<dyn DocumentRepository>,
    ) -> Self {
        Self {
            access,
            families,
            repo,
        }
    }

    pub fn family(&self, name: &str) -> CoreResult<Arc<DocumentFamily>> {
        self.families
            .get(name)
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown document family {name}")))
    }

    /// Loads a live document; deleted documents are reported as missing.
    pub async fn load(&self, id: Uuid) -> CoreResult<(Document, Arc<DocumentFamily>)> {
        let document = self
            .repo
            .find_document(id)
            .await?
            .filter(|doc| !doc.is_deleted)
            .ok_or_else(|| CoreError::not_found("document", id))?;
        let family = self.family(&document.family)?;
        Ok((document, family))
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        family_name: &str,
        fields: FieldValues,
    ) -> CoreResult<Document> {
        let family = self.family(family_name)?;
        reject_unknown_fields(&family, &fields)?;

        let stakeholders = family.stakeholders(&fields);
        self.access
            .authorize(user_id, &stakeholders, Permission::BsdCanCreate, CANNOT_CREATE)
            .await?;

        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4(),
            family: family.name.to_string(),
            fields,
            signatures: SignatureRecord::new(),
            version: 1,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.repo.insert_document(&document).await?;
        info!(document_id = %document.id, family = family.name, %user_id, "document created");
        Ok(document)
    }

    pub async fn get(&self, user_id: Uuid, id: Uuid) -> CoreResult<Document> {
        let (document, family) = self.load(id).await?;
        let stakeholders = family.stakeholders(&document.fields);
        self.access
            .authorize(user_id, &stakeholders, Permission::BsdCanRead, CANNOT_READ)
            .await?;
        Ok(document)
    }

    /// Applies a partial field update. The user must be able to update the
    /// document both before and after the change, and the change must not
    /// touch any sealed field.
    pub async fn update_fields(
        &self,
        user_id: Uuid,
        id: Uuid,
        proposed: FieldValues,
    ) -> CoreResult<Document> {
        if proposed.is_empty() {
            return Err(CoreError::InvalidInput("no changes provided".to_string()));
        }

        let (document, family) = self.load(id).await?;
        reject_unknown_fields(&family, &proposed)?;

        let current_stakeholders = family.stakeholders(&document.fields);
        self.access
            .authorize(
                user_id,
                &current_stakeholders,
                Permission::BsdCanUpdate,
                CANNOT_UPDATE,
            )
            .await?;

        let mut merged = document.fields.clone();
        merged.extend(proposed.iter().map(|(k, v)| (k.clone(), v.clone())));

        let next_stakeholders = family.stakeholders(&merged);
        self.access
            .authorize(
                user_id,
                &next_stakeholders,
                Permission::BsdCanUpdate,
                CANNOT_REMOVE_SELF,
            )
            .await?;

        family
            .machine
            .check_edit(&document.signatures, &document.fields, &proposed)?;

        let saved = self
            .repo
            .save_document(id, document.version, &merged, &document.signatures)
            .await?
            .ok_or_else(concurrent_write)?;
        info!(document_id = %id, %user_id, fields = proposed.len(), "document fields updated");
        Ok(saved)
    }

    /// Signs `checkpoint` on behalf of the organization named in the
    /// checkpoint's signer field.
    pub async fn sign(&self, user_id: Uuid, id: Uuid, checkpoint: &str) -> CoreResult<Document> {
        let (document, family) = self.load(id).await?;
        let policy = family.checkpoint(checkpoint).ok_or_else(|| {
            CoreError::InvalidInput(format!(
                "unknown checkpoint {checkpoint} for {}",
                family.name
            ))
        })?;

        let signer: Option<OrgId> = document
            .fields
            .get(policy.signer_field)
            .and_then(|value| value.as_str())
            .map(OrgId::from);
        let message = format!(
            "only the organization in {} can sign {checkpoint}",
            policy.signer_field
        );
        let signer_org = self
            .access
            .authorize(user_id, signer.iter(), policy.permission, &message)
            .await?;

        family
            .machine
            .check_signable(&document.signatures, checkpoint, &document.fields)?;

        let mut signatures = document.signatures.clone();
        signatures.record(checkpoint, Utc::now(), user_id.to_string());

        let saved = self
            .repo
            .save_document(id, document.version, &document.fields, &signatures)
            .await?
            .ok_or_else(concurrent_write)?;
        info!(document_id = %id, %user_id, org_id = %signer_org, checkpoint, "document signed");
        Ok(saved)
    }

    pub async fn sealed_fields(&self, user_id: Uuid, id: Uuid) -> CoreResult<BTreeSet<&'static str>> {
        let document = self.get(user_id, id).await?;
        let family = self.family(&document.family)?;
        Ok(family
            .machine
            .sealed_fields_for(&document.signatures, &document.fields))
    }
}

fn reject_unknown_fields(family: &DocumentFamily, fields: &FieldValues) -> CoreResult<()> {
    let unknown = family.unknown_fields(fields);
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(CoreError::InvalidInput(format!(
            "unknown fields for {}: {}",
            family.name,
            unknown.join(", ")
        )))
    }
}

fn concurrent_write() -> CoreError {
    CoreError::invalid_state("document was modified concurrently, reload and retry")
}
