//! Raw-SQL backend.
//!
//! Every operation is literal parameterized SQL executed through a
//! [`Query`] against a direct file-backed connection.

use crate::db::context::{ContextManager, ScopeGuard};
use crate::db::database::{UserStore, backup_file, is_expired, unix_now};
use crate::db::entity::create_table_sql;
use crate::db::executor::{execute_script, execute_statement, last_changes};
use crate::db::named::{self, NamedQuery};
use crate::db::params::BoundParams;
use crate::db::provider::{ScopedConnection, SqliteFileProvider};
use crate::db::query::Query;
use crate::error::{DbError, DbResult};
use crate::models::{AuthToken, DatabaseConfig, ParamInput, QueryRows, TokenOwner, User};
use crate::params;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Raw-SQL facade over one SQLite file.
#[derive(Debug)]
pub struct SqliteDatabase {
    path: PathBuf,
    context: Arc<ContextManager<SqliteFileProvider>>,
}

impl SqliteDatabase {
    /// Open the database, creating it from the schema script and/or the
    /// built-in auth tables when the file does not exist yet.
    pub async fn open(config: &DatabaseConfig) -> DbResult<Self> {
        let db = Self {
            path: config.path.clone(),
            context: ContextManager::new(SqliteFileProvider::new(&config.path)),
        };

        if !tokio::fs::try_exists(&config.path).await? {
            info!(path = %config.path.display(), "Creating database from schema file");
            db.create_database(config.schema_file.as_deref(), config.add_user_tables)
                .await?;
        }
        Ok(db)
    }

    async fn create_database(
        &self,
        schema_file: Option<&Path>,
        add_user_tables: bool,
    ) -> DbResult<()> {
        let schema = match schema_file {
            Some(path) => Some(tokio::fs::read_to_string(path).await?),
            None => None,
        };

        let scope = self.scope().await?;
        let result = async {
            let mut conn = scope.lock().await;
            if let Some(schema) = &schema {
                execute_script(conn.connection(), schema).await?;
            }
            if add_user_tables {
                let tables = format!(
                    "{};\n{};",
                    create_table_sql::<User>(),
                    create_table_sql::<AuthToken>()
                );
                execute_script(conn.connection(), &tables).await?;
            }
            Ok::<_, DbError>(())
        }
        .await;
        scope.release().await;
        result
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn context(&self) -> &Arc<ContextManager<SqliteFileProvider>> {
        &self.context
    }

    /// Enter a scope for the current execution context.
    pub async fn scope(&self) -> DbResult<ScopeGuard<SqliteFileProvider>> {
        self.context.enter().await
    }

    /// Build a deferred query bound to this database.
    pub fn query(&self, sql: impl Into<String>, params: Vec<ParamInput>) -> Query {
        Query::new(Arc::clone(&self.context), sql, params)
    }

    fn named(&self, query: &NamedQuery, params: Vec<ParamInput>) -> Query {
        query.build(Arc::clone(&self.context), params)
    }

    /// Build a registered query by name.
    pub fn named_query(&self, name: &str, params: Vec<ParamInput>) -> Option<Query> {
        named::lookup(name).map(|q| self.named(q, params))
    }

    /// Execute on the connection of the current scope.
    ///
    /// Fails unless the calling context has entered a scope.
    pub async fn execute_query(
        &self,
        sql: &str,
        params: Vec<ParamInput>,
        commit: bool,
    ) -> DbResult<QueryRows> {
        if !self.context.is_active() {
            return Err(DbError::database(
                "No database connection is active.",
                "Enter a scope with `scope()` before executing",
            ));
        }

        let scope = self.scope().await?;
        let result = {
            let mut conn = scope.lock().await;
            execute_statement(conn.connection(), sql, &BoundParams::collect(params), commit).await
        };
        scope.release().await;
        result
    }

    /// Run a multi-statement script in one scope.
    pub async fn execute_script(&self, script: &str) -> DbResult<u64> {
        let scope = self.scope().await?;
        let result = execute_script(scope.lock().await.connection(), script).await;
        scope.release().await;
        result
    }

    pub async fn last_changes(&self) -> DbResult<u64> {
        let scope = self.scope().await?;
        let result = last_changes(scope.lock().await.connection()).await;
        scope.release().await;
        result
    }

    pub async fn create_backup(&self) -> DbResult<PathBuf> {
        backup_file(&self.path).await
    }

    pub fn create_user_query(&self, user_id: &str, name: &str, password_hash: &str) -> Query {
        self.named(&named::CREATE_USER, params![user_id, name, password_hash])
    }

    pub fn password_query(&self, name: &str) -> Query {
        self.named(&named::GET_PASSWORD, params![name])
    }

    pub fn user_id_query(&self, name: &str) -> Query {
        self.named(&named::GET_USER_ID, params![name])
    }

    pub fn save_token_query(&self, token: &str, user_id: &str, expires: i64) -> Query {
        self.named(&named::SAVE_AUTH_TOKEN, params![user_id, token, expires])
    }

    pub fn token_owner_query(&self, token: &str) -> Query {
        self.named(&named::GET_TOKEN_OWNER, params![token])
    }

    pub fn auth_token_query(&self, user_id: &str, now: i64) -> Query {
        self.named(&named::GET_AUTH_TOKEN, params![user_id, now])
    }

    pub fn delete_token_query(&self, token: &str) -> Query {
        self.named(&named::DELETE_AUTH_TOKEN, params![token])
    }

    async fn token_owner(&self, token: &str) -> DbResult<Option<TokenOwner>> {
        let Some(row) = self.token_owner_query(token).run().await?.into_row() else {
            return Ok(None);
        };

        let expires = row.get_i64(2).unwrap_or(0);
        if is_expired(expires, unix_now()) {
            self.delete_token_query(token).run().await?;
            debug!(token = %crate::auth::mask_token(token), "Deleted expired token");
            return Ok(None);
        }

        Ok(Some(TokenOwner {
            user_id: row.get_str(0).unwrap_or_default().to_string(),
            name: row.get_str(1).unwrap_or_default().to_string(),
        }))
    }
}

impl UserStore for SqliteDatabase {
    async fn create_user(&self, user_id: &str, name: &str, password_hash: &str) -> DbResult<bool> {
        match self.create_user_query(user_id, name, password_hash).run().await {
            Ok(_) => Ok(true),
            Err(e) if e.is_unique_violation() => {
                debug!(name = %name, "User already exists");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn password_matches(&self, name: &str, password_hash: &str) -> DbResult<bool> {
        let stored = self.password_query(name).run().await?.into_string();
        Ok(stored.is_some_and(|stored| crate::auth::constant_time_eq(&stored, password_hash)))
    }

    async fn get_user_id(&self, name: &str) -> DbResult<Option<String>> {
        Ok(self.user_id_query(name).run().await?.into_string())
    }

    async fn save_auth_token(&self, token: &str, user_id: &str, max_age_secs: i64) -> DbResult<()> {
        let expires = unix_now() + max_age_secs;
        self.save_token_query(token, user_id, expires).run().await?;
        Ok(())
    }

    async fn get_user_id_from_token(&self, token: &str) -> DbResult<Option<TokenOwner>> {
        // Lookup and eviction share one connection.
        let scope = self.scope().await?;
        let result = self.token_owner(token).await;
        scope.release().await;
        result
    }

    async fn get_auth_token(&self, user_id: &str) -> DbResult<Option<String>> {
        Ok(self
            .auth_token_query(user_id, unix_now())
            .run()
            .await?
            .into_string())
    }
}
