//! Data models for the data-access layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod auth;
pub mod connection;
pub mod query;

// Re-export commonly used types
pub use auth::{AuthToken, MAX_PASSWORD_HASH_LEN, MAX_USERNAME_LEN, TokenOwner, User};
pub use connection::{BackendKind, DEFAULT_MAX_SESSIONS, DatabaseConfig};
pub use query::{ParamInput, QueryOutput, QueryParam, QueryRows, Row};
