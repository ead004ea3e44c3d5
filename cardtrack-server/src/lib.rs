//! cardtrack-server library
//!
//! Credit-card application tracking: the application store, reconciliation
//! against uploaded continuation data, batch ingest, the audit log and the
//! access policy that gates all of them. The HTTP layer in [`api`] is thin
//! glue over these components.

use axum::Router;
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod applications;
pub mod audit;
pub mod continuation;
pub mod ingest;
pub mod pagination;
pub mod policy;
pub mod reconcile;
pub mod users;

mod rows;

use applications::ApplicationStore;
use continuation::ContinuationStore;
use ingest::BatchIngest;
use reconcile::ReconciliationEngine;
use users::UserDirectory;

/// Application state shared across HTTP handlers
///
/// Every component holds a handle to the same pool; there is no ambient
/// session state.
#[derive(Clone)]
pub struct AppState {
    pub applications: ApplicationStore,
    pub continuation: ContinuationStore,
    pub reconciliation: ReconciliationEngine,
    pub ingest: BatchIngest,
    pub users: UserDirectory,
}

impl AppState {
    pub fn new(db: SqlitePool) -> Self {
        let applications = ApplicationStore::new(db.clone());
        let continuation = ContinuationStore::new(db.clone());
        Self {
            reconciliation: ReconciliationEngine::new(db.clone()),
            ingest: BatchIngest::new(applications.clone(), continuation.clone()),
            users: UserDirectory::new(db),
            applications,
            continuation,
        }
    }
}

/// Build application router
///
/// `/health` is public; everything under `/api` requires a resolved caller.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;

    let protected = Router::new()
        .merge(api::application_routes())
        .merge(api::continuation_routes())
        .merge(api::user_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::identity_middleware,
        ));

    Router::new()
        .nest("/api", protected)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
