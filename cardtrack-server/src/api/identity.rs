//! Identity middleware
//!
//! Authentication happens upstream; the fronting identity provider names the
//! caller with the `X-User-Id` header. This layer resolves that id to an
//! active principal and hands it to handlers as a request extension.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use cardtrack_common::Error;

use crate::api::ApiError;
use crate::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";

pub async fn identity_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(USER_ID_HEADER)
        .ok_or_else(|| Error::Unauthenticated("missing X-User-Id header".to_string()))?;

    let user_id = header
        .to_str()
        .ok()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .ok_or_else(|| Error::Unauthenticated("malformed X-User-Id header".to_string()))?;

    let principal = state.users.resolve_principal(user_id).await?;
    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}
