//! Continuation upload, browsing and reconciliation endpoints

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use cardtrack_common::models::{ContinuationRecord, Principal};
use cardtrack_common::time;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::api::{ApiError, ApiResult};
use crate::continuation::ContinuationFilter;
use crate::ingest::{IngestReport, IngestTarget, Row};
use crate::pagination::Page;
use crate::reconcile::{MatchSummary, ReconciliationResult};
use crate::AppState;

/// Upload body; `upload_date` defaults to today
#[derive(Debug, Deserialize)]
pub struct ContinuationUploadRequest {
    #[serde(default)]
    pub upload_date: Option<NaiveDate>,
    pub rows: Vec<Row>,
}

/// Date selector shared by reconcile and summary; defaults to today
#[derive(Debug, Default, Deserialize)]
pub struct UploadDate {
    #[serde(default)]
    pub upload_date: Option<NaiveDate>,
}

impl UploadDate {
    fn or_today(&self) -> NaiveDate {
        self.upload_date.unwrap_or_else(time::today)
    }
}

/// GET /api/continuation
pub async fn list_continuation(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
    Query(filter): Query<ContinuationFilter>,
) -> ApiResult<Json<Page<ContinuationRecord>>> {
    Ok(Json(state.continuation.list(&filter, &actor).await?))
}

/// POST /api/continuation/upload
pub async fn upload_continuation(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
    Json(upload): Json<ContinuationUploadRequest>,
) -> ApiResult<Json<IngestReport>> {
    if upload.rows.is_empty() {
        return Err(ApiError::BadRequest("no rows supplied".to_string()));
    }
    let upload_date = upload.upload_date.unwrap_or_else(time::today);
    let report = state
        .ingest
        .ingest(upload.rows, IngestTarget::Continuation { upload_date }, &actor)
        .await?;
    Ok(Json(report))
}

/// POST /api/continuation/reconcile
pub async fn reconcile(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
    body: Option<Json<UploadDate>>,
) -> ApiResult<Json<ReconciliationResult>> {
    let date = body.map(|Json(b)| b).unwrap_or_default().or_today();
    Ok(Json(state.reconciliation.run(date, &actor).await?))
}

/// GET /api/continuation/summary
pub async fn summary(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
    Query(query): Query<UploadDate>,
) -> ApiResult<Json<MatchSummary>> {
    Ok(Json(state.reconciliation.summary(query.or_today(), &actor).await?))
}

pub fn continuation_routes() -> Router<AppState> {
    Router::new()
        .route("/continuation", get(list_continuation))
        .route("/continuation/upload", post(upload_continuation))
        .route("/continuation/reconcile", post(reconcile))
        .route("/continuation/summary", get(summary))
}
