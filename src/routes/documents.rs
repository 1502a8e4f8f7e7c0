use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::documents::Document;
use crate::error::AppResult;
use crate::seal::FieldValues;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateDocumentRequest {
    pub family: String,
    #[serde(default)]
    pub fields: FieldValues,
}

#[derive(Deserialize)]
pub struct UpdateDocumentRequest {
    pub fields: FieldValues,
}

#[derive(Deserialize)]
pub struct SignDocumentRequest {
    pub checkpoint: String,
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub document: Document,
}

#[derive(Serialize)]
pub struct SealedFieldsResponse {
    pub document_id: Uuid,
    pub sealed_fields: Vec<&'static str>,
}

pub async fn create_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateDocumentRequest>,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    let document = state
        .documents
        .create(user.user_id, &payload.family, payload.fields)
        .await?;
    Ok((StatusCode::CREATED, Json(DocumentResponse { document })))
}

pub async fn get_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DocumentResponse>> {
    let document = state.documents.get(user.user_id, id).await?;
    Ok(Json(DocumentResponse { document }))
}

pub async fn update_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateDocumentRequest>,
) -> AppResult<Json<DocumentResponse>> {
    let document = state
        .documents
        .update_fields(user.user_id, id, payload.fields)
        .await?;
    Ok(Json(DocumentResponse { document }))
}

pub async fn sign_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<SignDocumentRequest>,
) -> AppResult<Json<DocumentResponse>> {
    let document = state
        .documents
        .sign(user.user_id, id, &payload.checkpoint)
        .await?;
    Ok(Json(DocumentResponse { document }))
}

pub async fn sealed_fields(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SealedFieldsResponse>> {
    let sealed = state.documents.sealed_fields(user.user_id, id).await?;
    Ok(Json(SealedFieldsResponse {
        document_id: id,
        sealed_fields: sealed.into_iter().collect(),
    }))
}
