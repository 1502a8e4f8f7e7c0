//! Signature-gated field sealing.
//!
//! A document family declares an ordered list of signature checkpoints and,
//! per field, the checkpoint from which that field can no longer change. The
//! [`SealStageMachine`] turns a document's [`SignatureRecord`] plus a proposed
//! edit into either success or the complete list of sealed fields the edit
//! would mutate.

pub mod machine;
pub mod value;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use machine::{FieldRule, SealCondition, SealStageMachine, Stage};
pub use value::FieldKind;

/// Field name → JSON value, as stored on a document.
pub type FieldValues = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub signed_at: Option<DateTime<Utc>>,
    pub signed_by: Option<String>,
}

/// Checkpoints reached by one document, keyed by checkpoint name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureRecord {
    entries: BTreeMap<String, Signature>,
}

impl SignatureRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_at(&self, checkpoint: &str) -> Option<DateTime<Utc>> {
        self.entries.get(checkpoint).and_then(|s| s.signed_at)
    }

    pub fn signature(&self, checkpoint: &str) -> Option<&Signature> {
        self.entries.get(checkpoint)
    }

    pub fn is_signed(&self, checkpoint: &str) -> bool {
        self.signed_at(checkpoint).is_some()
    }

    pub fn record(&mut self, checkpoint: &str, at: DateTime<Utc>, by: impl Into<String>) {
        self.entries.insert(
            checkpoint.to_string(),
            Signature {
                signed_at: Some(at),
                signed_by: Some(by.into()),
            },
        );
    }

    pub fn with_signature(mut self, checkpoint: &str, at: DateTime<Utc>, by: &str) -> Self {
        self.record(checkpoint, at, by);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Signature)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}
