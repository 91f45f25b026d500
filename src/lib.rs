//! scopedb library
//!
//! A SQLite data-access layer with reentrant per-task connection scopes,
//! deferred query objects, interchangeable raw-SQL and entity-mapped
//! backends, and a user/auth-token store with login and signup flows.

pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use auth::{AuthOutcome, AuthService, Credentials, Secrets};
pub use config::Config;
pub use db::{Database, Query, ResultFormat, UserStore};
pub use error::{DbError, DbResult};
