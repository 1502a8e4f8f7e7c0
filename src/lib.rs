pub mod auth;
pub mod config;
pub mod db;
pub mod documents;
pub mod error;
pub mod events;
pub mod membership;
pub mod models;
pub mod permissions;
pub mod repository;
pub mod revision;
pub mod routes;
pub mod schema;
pub mod seal;
pub mod state;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a tenant organization (e.g. a SIRET or VAT number).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(String);

impl OrgId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blank identifiers stand for "no organization" and never authorize.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrgId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for OrgId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<OrgId> for String {
    fn from(value: OrgId) -> Self {
        value.0
    }
}
