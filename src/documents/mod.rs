pub mod families;
pub mod service;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::seal::{FieldValues, SignatureRecord};

pub use families::{CheckpointPolicy, DocumentFamily, FamilyRegistry};
pub use service::DocumentService;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: Uuid,
    pub family: String,
    pub fields: FieldValues,
    pub signatures: SignatureRecord,
    /// Bumped on every write; used for optimistic concurrency.
    pub version: i32,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage of documents' current field values and signature records.
#[async_trait]
pub trait DocumentRepository: Send + Sync + 'static {
    async fn insert_document(&self, document: &Document) -> Result<()>;

    async fn find_document(&self, id: Uuid) -> Result<Option<Document>>;

    /// Writes `fields` and `signatures` only if the stored version still equals
    /// `expected_version`. Returns `None` when another write won the race.
    async fn save_document(
        &self,
        id: Uuid,
        expected_version: i32,
        fields: &FieldValues,
        signatures: &SignatureRecord,
    ) -> Result<Option<Document>>;
}
