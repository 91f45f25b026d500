//! The backend-agnostic database facade.
//!
//! [`UserStore`] is the operation set both backends implement with
//! identical observable semantics. [`Database`] selects one backend at
//! construction time and dispatches to it.

use crate::db::context::{ContextStats, ScopeGuard};
use crate::db::mapped::MappedDatabase;
use crate::db::provider::{SessionProvider, SqliteFileProvider};
use crate::db::query::Query;
use crate::db::sqlite::SqliteDatabase;
use crate::error::DbResult;
use crate::impl_db_dispatch;
use crate::models::{BackendKind, DatabaseConfig, ParamInput, TokenOwner};
use crate::models::connection::backup_path_for;
use humansize::{DECIMAL, format_size};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::info;

/// User and token persistence.
pub trait UserStore: Send + Sync {
    /// Insert a user. `Ok(false)` when the name (or id) is already taken.
    fn create_user(
        &self,
        user_id: &str,
        name: &str,
        password_hash: &str,
    ) -> impl Future<Output = DbResult<bool>> + Send;

    /// Whether `name` exists with exactly this hash. An unknown user and a
    /// wrong hash are indistinguishable.
    fn password_matches(
        &self,
        name: &str,
        password_hash: &str,
    ) -> impl Future<Output = DbResult<bool>> + Send;

    fn get_user_id(&self, name: &str) -> impl Future<Output = DbResult<Option<String>>> + Send;

    /// Store a token expiring `max_age_secs` from now.
    fn save_auth_token(
        &self,
        token: &str,
        user_id: &str,
        max_age_secs: i64,
    ) -> impl Future<Output = DbResult<()>> + Send;

    /// Resolve a token to its owner. An expired token is deleted and
    /// reported as absent.
    fn get_user_id_from_token(
        &self,
        token: &str,
    ) -> impl Future<Output = DbResult<Option<TokenOwner>>> + Send;

    /// Most recently issued unexpired token of a user.
    fn get_auth_token(&self, user_id: &str)
    -> impl Future<Output = DbResult<Option<String>>> + Send;
}

/// Current server time in whole unix seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A token is expired once its expiry lies strictly before `now`.
pub fn is_expired(expires: i64, now: i64) -> bool {
    expires < now
}

/// Copy `path` to its sibling backup path, replacing any earlier backup.
pub(crate) async fn backup_file(path: &Path) -> DbResult<PathBuf> {
    let backup = backup_path_for(path);
    if tokio::fs::try_exists(&backup).await? {
        tokio::fs::remove_file(&backup).await?;
    }
    let bytes = tokio::fs::copy(path, &backup).await?;
    info!(
        source = %path.display(),
        backup = %backup.display(),
        size = %format_size(bytes, DECIMAL),
        "Created database backup"
    );
    Ok(backup)
}

/// One of the two interchangeable backends.
#[derive(Debug)]
pub enum Database {
    Raw(SqliteDatabase),
    Mapped(MappedDatabase),
}

/// A scope entered on either backend.
#[derive(Debug)]
pub enum DatabaseScope {
    Raw(ScopeGuard<SqliteFileProvider>),
    Mapped(ScopeGuard<SessionProvider>),
}

impl DatabaseScope {
    pub async fn release(self) {
        match self {
            Self::Raw(scope) => scope.release().await,
            Self::Mapped(scope) => scope.release().await,
        }
    }

    /// Commit work left pending by uncommitted calls.
    pub async fn commit(&self) -> DbResult<()> {
        match self {
            Self::Raw(scope) => scope.commit().await,
            Self::Mapped(scope) => scope.commit().await,
        }
    }
}

/// A query built for either backend.
#[derive(Debug)]
pub enum AnyQuery {
    Raw(Query<SqliteFileProvider>),
    Mapped(Query<SessionProvider>),
}

impl AnyQuery {
    pub async fn call(&self, commit: bool, raw: bool) -> DbResult<crate::models::QueryOutput> {
        match self {
            Self::Raw(q) => q.call(commit, raw).await,
            Self::Mapped(q) => q.call(commit, raw).await,
        }
    }
}

impl std::fmt::Display for AnyQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raw(q) => std::fmt::Display::fmt(q, f),
            Self::Mapped(q) => std::fmt::Display::fmt(q, f),
        }
    }
}

impl Database {
    /// Open the backend the configuration selects.
    pub async fn open(config: &DatabaseConfig) -> DbResult<Self> {
        match config.backend {
            BackendKind::Raw => Ok(Self::Raw(SqliteDatabase::open(config).await?)),
            BackendKind::Mapped => {
                let mut builder = MappedDatabase::builder(&config.path)
                    .add_user_tables(config.add_user_tables)
                    .max_sessions(config.max_sessions);
                if let Some(schema) = &config.schema_file {
                    builder = builder.schema_file(schema);
                }
                Ok(Self::Mapped(builder.open().await?))
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Raw(_) => BackendKind::Raw,
            Self::Mapped(_) => BackendKind::Mapped,
        }
    }

    pub fn path(&self) -> &Path {
        impl_db_dispatch!(self, db => db.path())
    }

    /// Enter a scope for the current execution context.
    pub async fn scope(&self) -> DbResult<DatabaseScope> {
        match self {
            Self::Raw(db) => db.scope().await.map(DatabaseScope::Raw),
            Self::Mapped(db) => db.scope().await.map(DatabaseScope::Mapped),
        }
    }

    pub fn stats(&self) -> ContextStats {
        impl_db_dispatch!(self, db => db.context().stats())
    }

    /// Build a registered query by name.
    pub fn named_query(&self, name: &str, params: Vec<ParamInput>) -> Option<AnyQuery> {
        match self {
            Self::Raw(db) => db.named_query(name, params).map(AnyQuery::Raw),
            Self::Mapped(db) => db.named_query(name, params).map(AnyQuery::Mapped),
        }
    }

    /// Build a literal SQL query on the active backend.
    pub fn query(&self, sql: impl Into<String>, params: Vec<ParamInput>) -> AnyQuery {
        match self {
            Self::Raw(db) => AnyQuery::Raw(db.query(sql, params)),
            Self::Mapped(db) => AnyQuery::Mapped(db.query(sql, params)),
        }
    }

    /// Run a multi-statement script in one scope.
    pub async fn execute_script(&self, script: &str) -> DbResult<u64> {
        impl_db_dispatch!(self, db => db.execute_script(script).await)
    }

    /// Rows changed by the most recent write of the current context's connection.
    pub async fn last_changes(&self) -> DbResult<u64> {
        impl_db_dispatch!(self, db => db.last_changes().await)
    }

    /// Copy the store file to `<stem>_backup.<ext>`, replacing any earlier backup.
    pub async fn create_backup(&self) -> DbResult<PathBuf> {
        impl_db_dispatch!(self, db => db.create_backup().await)
    }

    /// Release pooled resources held by the backend.
    pub async fn close(&self) {
        if let Self::Mapped(db) = self {
            db.close().await;
        }
    }
}

impl UserStore for Database {
    async fn create_user(&self, user_id: &str, name: &str, password_hash: &str) -> DbResult<bool> {
        impl_db_dispatch!(self, db => db.create_user(user_id, name, password_hash).await)
    }

    async fn password_matches(&self, name: &str, password_hash: &str) -> DbResult<bool> {
        impl_db_dispatch!(self, db => db.password_matches(name, password_hash).await)
    }

    async fn get_user_id(&self, name: &str) -> DbResult<Option<String>> {
        impl_db_dispatch!(self, db => db.get_user_id(name).await)
    }

    async fn save_auth_token(&self, token: &str, user_id: &str, max_age_secs: i64) -> DbResult<()> {
        impl_db_dispatch!(self, db => db.save_auth_token(token, user_id, max_age_secs).await)
    }

    async fn get_user_id_from_token(&self, token: &str) -> DbResult<Option<TokenOwner>> {
        impl_db_dispatch!(self, db => db.get_user_id_from_token(token).await)
    }

    async fn get_auth_token(&self, user_id: &str) -> DbResult<Option<String>> {
        impl_db_dispatch!(self, db => db.get_auth_token(user_id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_is_strict() {
        assert!(!is_expired(100, 100));
        assert!(is_expired(99, 100));
        assert!(!is_expired(101, 100));
    }

    #[tokio::test]
    async fn test_backup_replaces_previous() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("store.db");

        tokio::fs::write(&source, b"first").await.unwrap();
        let backup = backup_file(&source).await.unwrap();
        assert_eq!(backup, dir.path().join("store_backup.db"));

        tokio::fs::write(&source, b"second").await.unwrap();
        backup_file(&source).await.unwrap();
        assert_eq!(tokio::fs::read(&backup).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_backup_of_missing_file_is_database_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = backup_file(&dir.path().join("absent.db")).await.unwrap_err();
        assert!(matches!(err, crate::error::DbError::Database { .. }));
    }
}
