//! HTTP API handlers for cardtrack-server
//!
//! Thin glue: handlers extract the caller and request payload, call one
//! component operation and serialize its result. Authorization lives in the
//! components, not here.

pub mod applications;
pub mod continuation;
pub mod error;
pub mod health;
pub mod identity;
pub mod users;

pub use applications::application_routes;
pub use continuation::continuation_routes;
pub use error::{ApiError, ApiResult};
pub use health::health_routes;
pub use identity::{identity_middleware, USER_ID_HEADER};
pub use users::user_routes;
