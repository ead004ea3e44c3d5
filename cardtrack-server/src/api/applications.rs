//! Application endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use cardtrack_common::models::{
    ApplicationPatch, ApplicationRecord, AuditEntry, NewApplication, Principal,
};
use serde::Deserialize;

use crate::api::{ApiError, ApiResult};
use crate::applications::{ApplicationChoices, ApplicationFilter, ApplicationStore};
use crate::ingest::{IngestReport, IngestTarget, Row};
use crate::pagination::Page;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub assigned_to: i64,
}

#[derive(Debug, Deserialize)]
pub struct MatchStatusRequest {
    pub continuation_matched: bool,
    #[serde(default)]
    pub remarks: Option<String>,
}

/// Already-parsed spreadsheet rows
#[derive(Debug, Deserialize)]
pub struct BulkUploadRequest {
    pub rows: Vec<Row>,
}

/// GET /api/applications
pub async fn list_applications(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
    Query(filter): Query<ApplicationFilter>,
) -> ApiResult<Json<Page<ApplicationRecord>>> {
    Ok(Json(state.applications.list(&filter, &actor).await?))
}

/// POST /api/applications
pub async fn create_application(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
    Json(new_app): Json<NewApplication>,
) -> ApiResult<(StatusCode, Json<ApplicationRecord>)> {
    let record = state.applications.create(new_app, &actor).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/applications/choices
pub async fn application_choices() -> Json<ApplicationChoices> {
    Json(ApplicationStore::choices())
}

/// GET /api/applications/unmatched
pub async fn unmatched_applications(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
) -> ApiResult<Json<Vec<ApplicationRecord>>> {
    Ok(Json(state.applications.unmatched(&actor).await?))
}

/// POST /api/applications/bulk-upload
pub async fn bulk_upload_applications(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
    Json(upload): Json<BulkUploadRequest>,
) -> ApiResult<Json<IngestReport>> {
    if upload.rows.is_empty() {
        return Err(ApiError::BadRequest("no rows supplied".to_string()));
    }
    let report = state
        .ingest
        .ingest(upload.rows, IngestTarget::Applications, &actor)
        .await?;
    Ok(Json(report))
}

/// GET /api/applications/:id
pub async fn get_application(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApplicationRecord>> {
    Ok(Json(state.applications.get(id, &actor).await?))
}

/// PUT /api/applications/:id
pub async fn update_application(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
    Path(id): Path<i64>,
    Json(patch): Json<ApplicationPatch>,
) -> ApiResult<Json<ApplicationRecord>> {
    if patch.is_empty() {
        return Err(ApiError::BadRequest("no fields to update".to_string()));
    }
    Ok(Json(state.applications.update(id, patch, &actor).await?))
}

/// PUT /api/applications/:id/assign
pub async fn assign_application(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
    Path(id): Path<i64>,
    Json(request): Json<AssignRequest>,
) -> ApiResult<Json<ApplicationRecord>> {
    let record = state
        .applications
        .assign(id, request.assigned_to, &actor)
        .await?;
    Ok(Json(record))
}

/// PUT /api/applications/:id/match-status
pub async fn set_match_status(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
    Path(id): Path<i64>,
    Json(request): Json<MatchStatusRequest>,
) -> ApiResult<Json<ApplicationRecord>> {
    let record = state
        .reconciliation
        .set_match_status(id, request.continuation_matched, request.remarks, &actor)
        .await?;
    Ok(Json(record))
}

/// GET /api/applications/:id/history
pub async fn application_history(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    Ok(Json(state.applications.history(id, &actor).await?))
}

pub fn application_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/applications",
            get(list_applications).post(create_application),
        )
        .route("/applications/choices", get(application_choices))
        .route("/applications/unmatched", get(unmatched_applications))
        .route("/applications/bulk-upload", post(bulk_upload_applications))
        .route(
            "/applications/:id",
            get(get_application).put(update_application),
        )
        .route("/applications/:id/assign", put(assign_application))
        .route("/applications/:id/match-status", put(set_match_status))
        .route("/applications/:id/history", get(application_history))
}
