use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Display;
use thiserror::Error;
use uuid::Uuid;

use crate::permissions::catalog::Permission;
use crate::OrgId;

pub type CoreResult<T> = Result<T, CoreError>;

/// A field rejected by the seal check, with its display label when the
/// family declares one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SealedField {
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{message}")]
    Forbidden {
        message: String,
        permission: Option<Permission>,
    },

    #[error("sealed fields cannot be modified: {}", field_names(.fields).join(", "))]
    SealViolation { fields: Vec<SealedField> },

    #[error("missing required fields for {checkpoint}: {}", .fields.join(", "))]
    MissingFields {
        checkpoint: String,
        fields: Vec<String>,
    },

    #[error("{org_id} is not an approver of revision {request_id}")]
    NotApprover { request_id: Uuid, org_id: OrgId },

    #[error("{message}")]
    InvalidState { message: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl CoreError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
            permission: None,
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn seal_violation_fields(&self) -> Option<Vec<&str>> {
        match self {
            Self::SealViolation { fields } => Some(field_names(fields)),
            _ => None,
        }
    }
}

fn field_names(fields: &[SealedField]) -> Vec<&str> {
    fields.iter().map(|f| f.field.as_str()).collect()
}

impl From<diesel::result::Error> for CoreError {
    fn from(value: diesel::result::Error) -> Self {
        CoreError::Infrastructure(value.into())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    details: Option<Value>,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            details: self.details,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl From<CoreError> for AppError {
    fn from(value: CoreError) -> Self {
        let message = value.to_string();
        match value {
            CoreError::Forbidden { permission, .. } => {
                let err = AppError::new(StatusCode::FORBIDDEN, message);
                match permission {
                    Some(permission) => err.with_details(json!({ "permission": permission })),
                    None => err,
                }
            }
            CoreError::NotApprover { request_id, org_id } => {
                AppError::new(StatusCode::FORBIDDEN, message)
                    .with_details(json!({ "request_id": request_id, "org_id": org_id }))
            }
            CoreError::SealViolation { fields } => {
                AppError::bad_request(message).with_details(json!({ "sealed_fields": fields }))
            }
            CoreError::MissingFields { checkpoint, fields } => AppError::bad_request(message)
                .with_details(json!({ "checkpoint": checkpoint, "missing_fields": fields })),
            CoreError::InvalidInput(_) => AppError::bad_request(message),
            CoreError::InvalidState { .. } => AppError::new(StatusCode::CONFLICT, message),
            CoreError::NotFound { .. } => AppError::new(StatusCode::NOT_FOUND, message),
            CoreError::Infrastructure(err) => {
                tracing::error!(error = ?err, "infrastructure failure");
                AppError::internal(err)
            }
        }
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::not_found(),
            _ => AppError::internal(value),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_violation_lists_every_field() {
        let err = CoreError::SealViolation {
            fields: vec![
                SealedField {
                    field: "emitterName".into(),
                    label: None,
                },
                SealedField {
                    field: "wasteCode".into(),
                    label: Some("waste code".into()),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "sealed fields cannot be modified: emitterName, wasteCode"
        );
        assert_eq!(
            err.seal_violation_fields(),
            Some(vec!["emitterName", "wasteCode"])
        );
    }

    #[test]
    fn maps_core_errors_to_http_statuses() {
        let forbidden: AppError = CoreError::forbidden("nope").into();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let conflict: AppError = CoreError::invalid_state("already decided").into();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let missing: AppError = CoreError::not_found("document", Uuid::nil()).into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let sealed: AppError = CoreError::SealViolation { fields: vec![] }.into();
        assert_eq!(sealed.status(), StatusCode::BAD_REQUEST);
    }
}
