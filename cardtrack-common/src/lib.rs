//! # Cardtrack Common Library
//!
//! Shared code for the card application tracker including:
//! - Error taxonomy (Error enum)
//! - Domain models (applications, continuation records, audit entries, users)
//! - Configuration loading and root folder resolution
//! - Database initialization and migrations
//! - Timestamp utilities

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod time;

pub use error::{Error, Result};
