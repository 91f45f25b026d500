//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection providers for direct and pooled SQLite connections
//! - Reentrant per-execution-context scopes
//! - Deferred query objects with result shaping
//! - Static entity schema, statement builders and sessions
//! - The raw and mapped facades plus the dispatching [`Database`]

pub mod context;
pub mod database;
pub mod entity;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod mapped;
pub mod named;
pub mod params;
pub mod provider;
pub mod query;
pub mod session;
pub mod sqlite;
pub mod types;

pub use context::{ContextId, ContextManager, ContextStats, ScopeGuard};
pub use database::{AnyQuery, Database, DatabaseScope, UserStore, is_expired, unix_now};
pub use entity::{ColumnDef, ColumnType, Delete, Entity, Insert, Select, create_table_sql};
pub use mapped::{MappedDatabase, MappedDatabaseBuilder, TableSchema};
pub use named::NamedQuery;
pub use params::BoundParams;
pub use provider::{
    ConnectionProvider, DbConnection, ScopedConnection, SessionProvider, SqliteFileProvider,
};
pub use query::{FormatFn, Query, ResultFormat};
pub use session::Session;
pub use sqlite::SqliteDatabase;
