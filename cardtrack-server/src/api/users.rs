//! User endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use cardtrack_common::models::{Choice, NewUser, Principal, User, UserPatch};
use serde::Deserialize;

use crate::api::ApiResult;
use crate::users::UserDirectory;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct UserListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

/// GET /api/users
pub async fn list_users(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
    Query(query): Query<UserListQuery>,
) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.users.list_users(&actor, query.include_inactive).await?))
}

/// POST /api/users
pub async fn create_user(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
    Json(new_user): Json<NewUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let user = state.users.create_user(new_user, &actor).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /api/users/officers
pub async fn list_officers(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.users.list_officers(&actor).await?))
}

/// GET /api/users/roles
pub async fn list_roles() -> Json<Vec<Choice>> {
    Json(UserDirectory::roles())
}

/// GET /api/users/:id
pub async fn get_user(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.users.get_user(id, &actor).await?))
}

/// PUT /api/users/:id
pub async fn update_user(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
    Path(id): Path<i64>,
    Json(patch): Json<UserPatch>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.users.update_user(id, patch, &actor).await?))
}

/// DELETE /api/users/:id (soft delete)
pub async fn deactivate_user(
    State(state): State<AppState>,
    Extension(actor): Extension<Principal>,
    Path(id): Path<i64>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.users.deactivate_user(id, &actor).await?))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/officers", get(list_officers))
        .route("/users/roles", get(list_roles))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(deactivate_user),
        )
}
