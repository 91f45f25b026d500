//! Entity-mapped backend.
//!
//! Operations are expressed as [`Select`], `Insert` and [`Delete`]
//! statements over declared entity types, executed on a [`Session`]
//! checked out of a shared engine pool. The schema is derived from the
//! registered entities when the store file does not exist yet.

use crate::db::context::{ContextManager, ScopeGuard};
use crate::db::database::{UserStore, backup_file, is_expired, unix_now};
use crate::db::entity::{Delete, Entity, Select, create_table_sql};
use crate::db::executor::{execute_script, last_changes};
use crate::db::named;
use crate::db::provider::{ScopedConnection, SessionProvider};
use crate::db::query::Query;
use crate::db::session::Session;
use crate::error::{DbError, DbResult};
use crate::models::{AuthToken, DEFAULT_MAX_SESSIONS, ParamInput, Row, TokenOwner, User};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Table registered with a [`MappedDatabaseBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: &'static str,
    pub create_sql: String,
}

impl TableSchema {
    pub fn of<E: Entity>() -> Self {
        Self {
            table: E::TABLE,
            create_sql: create_table_sql::<E>(),
        }
    }
}

/// Builder for [`MappedDatabase`].
#[derive(Debug, Clone)]
pub struct MappedDatabaseBuilder {
    path: PathBuf,
    entities: Vec<TableSchema>,
    add_user_tables: bool,
    schema_file: Option<PathBuf>,
    max_sessions: u32,
    validate_entities: bool,
}

impl MappedDatabaseBuilder {
    /// Register an application entity type.
    pub fn entity<E: Entity>(mut self) -> Self {
        self.entities.push(TableSchema::of::<E>());
        self
    }

    /// Include the built-in `users` and `auth_tokens` tables.
    pub fn add_user_tables(mut self, add_user_tables: bool) -> Self {
        self.add_user_tables = add_user_tables;
        self
    }

    /// SQL script run before the entity tables are created.
    pub fn schema_file(mut self, schema_file: impl AsRef<Path>) -> Self {
        self.schema_file = Some(schema_file.as_ref().to_path_buf());
        self
    }

    pub fn max_sessions(mut self, max_sessions: u32) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    /// Whether sessions validate entities before queuing them (default off).
    ///
    /// With validation on, an over-long field is a `Validation` error instead
    /// of being stored as given, which the raw backend always does.
    pub fn validate_entities(mut self, validate: bool) -> Self {
        self.validate_entities = validate;
        self
    }

    fn tables(&self) -> Vec<TableSchema> {
        let mut tables = Vec::new();
        if self.add_user_tables {
            tables.push(TableSchema::of::<User>());
            tables.push(TableSchema::of::<AuthToken>());
        }
        tables.extend(self.entities.iter().cloned());
        tables
    }

    pub async fn open(self) -> DbResult<MappedDatabase> {
        let is_new = !tokio::fs::try_exists(&self.path).await?;
        let provider = SessionProvider::connect(&self.path, self.max_sessions)
            .await?
            .with_validation(self.validate_entities);

        let db = MappedDatabase {
            path: self.path.clone(),
            context: ContextManager::new(provider),
        };

        if is_new {
            info!(
                path = %self.path.display(),
                tables = self.tables().len(),
                "Creating database from entity schema"
            );
            db.create_database(self.schema_file.as_deref(), &self.tables())
                .await?;
        }
        Ok(db)
    }
}

/// Entity-mapped facade over one SQLite file.
#[derive(Debug)]
pub struct MappedDatabase {
    path: PathBuf,
    context: Arc<ContextManager<SessionProvider>>,
}

impl MappedDatabase {
    pub fn builder(path: impl AsRef<Path>) -> MappedDatabaseBuilder {
        MappedDatabaseBuilder {
            path: path.as_ref().to_path_buf(),
            entities: Vec::new(),
            add_user_tables: false,
            schema_file: None,
            max_sessions: DEFAULT_MAX_SESSIONS,
            validate_entities: false,
        }
    }

    async fn create_database(
        &self,
        schema_file: Option<&Path>,
        tables: &[TableSchema],
    ) -> DbResult<()> {
        let schema = match schema_file {
            Some(path) => Some(tokio::fs::read_to_string(path).await?),
            None => None,
        };

        let scope = self.scope().await?;
        let result = async {
            let mut session = scope.lock().await;
            if let Some(schema) = &schema {
                execute_script(session.connection(), schema).await?;
            }
            for table in tables {
                debug!(table = table.table, "Creating table");
                execute_script(session.connection(), &table.create_sql).await?;
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

    pub fn context(&self) -> &Arc<ContextManager<SessionProvider>> {
        &self.context
    }

    /// Enter a scope for the current execution context.
    pub async fn scope(&self) -> DbResult<ScopeGuard<SessionProvider>> {
        self.context.enter().await
    }

    /// Build a registered query by name, executed on the context's session.
    pub fn named_query(
        &self,
        name: &str,
        params: Vec<ParamInput>,
    ) -> Option<Query<SessionProvider>> {
        named::lookup(name).map(|q| q.build(Arc::clone(&self.context), params))
    }

    /// Build a literal SQL query executed on the context's session.
    pub fn query(
        &self,
        sql: impl Into<String>,
        params: Vec<ParamInput>,
    ) -> Query<SessionProvider> {
        Query::new(Arc::clone(&self.context), sql, params)
    }

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

    /// Close the shared engine.
    pub async fn close(&self) {
        self.context.provider().shutdown().await;
    }
}

impl MappedDatabase {
    async fn fetch_optional(&self, select: &Select) -> DbResult<Option<Row>> {
        let scope = self.scope().await?;
        let result = scope.lock().await.fetch_optional(select).await;
        scope.release().await;
        result
    }

    async fn insert<E: Entity>(&self, entity: &E) -> DbResult<()> {
        let scope = self.scope().await?;
        let result = {
            let mut session = scope.lock().await;
            match session.add(entity) {
                Ok(()) => session.commit().await,
                Err(e) => Err(e),
            }
        };
        scope.release().await;
        result
    }

    async fn token_owner(
        &self,
        session: &mut Session,
        token: &str,
    ) -> DbResult<Option<TokenOwner>> {
        let select = Select::from::<AuthToken>()
            .only(&["auth_tokens.holder_id", "users.name", "auth_tokens.expires"])
            .inner_join::<User>("auth_tokens.holder_id", "id")
            .filter("auth_tokens.token", token);
        let Some(row) = session.fetch_optional(&select).await? else {
            return Ok(None);
        };

        let expires = row.get_i64(2).unwrap_or(0);
        if is_expired(expires, unix_now()) {
            session
                .delete(&Delete::from::<AuthToken>().filter("token", token))
                .await?;
            session.commit().await?;
            debug!(token = %crate::auth::mask_token(token), "Deleted expired token");
            return Ok(None);
        }

        Ok(Some(TokenOwner {
            user_id: text(&row, 0),
            name: text(&row, 1),
        }))
    }
}

fn text(row: &Row, idx: usize) -> String {
    row.get_str(idx).unwrap_or_default().to_string()
}

impl UserStore for MappedDatabase {
    async fn create_user(&self, user_id: &str, name: &str, password_hash: &str) -> DbResult<bool> {
        match self.insert(&User::new(user_id, name, password_hash)).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_unique_violation() => {
                debug!(name = %name, "User already exists");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn password_matches(&self, name: &str, password_hash: &str) -> DbResult<bool> {
        let select = Select::from::<User>()
            .only(&["users.password"])
            .filter("users.name", name);
        let row = self.fetch_optional(&select).await?;
        Ok(row.is_some_and(|row| crate::auth::constant_time_eq(&text(&row, 0), password_hash)))
    }

    async fn get_user_id(&self, name: &str) -> DbResult<Option<String>> {
        let select = Select::from::<User>()
            .only(&["users.id"])
            .filter("users.name", name);
        Ok(self.fetch_optional(&select).await?.map(|row| text(&row, 0)))
    }

    async fn save_auth_token(&self, token: &str, user_id: &str, max_age_secs: i64) -> DbResult<()> {
        self.insert(&AuthToken {
            holder_id: user_id.to_string(),
            token: token.to_string(),
            expires: unix_now() + max_age_secs,
        })
        .await
    }

    async fn get_user_id_from_token(&self, token: &str) -> DbResult<Option<TokenOwner>> {
        let scope = self.scope().await?;
        let result = {
            let mut session = scope.lock().await;
            self.token_owner(&mut session, token).await
        };
        scope.release().await;
        result
    }

    async fn get_auth_token(&self, user_id: &str) -> DbResult<Option<String>> {
        let select = Select::from::<AuthToken>()
            .filter("auth_tokens.holder_id", user_id)
            .filter_at_least("auth_tokens.expires", unix_now())
            .order_by_desc("auth_tokens.expires")
            .limit(1);

        let scope = self.scope().await?;
        let result = scope.lock().await.fetch_entities::<AuthToken>(&select).await;
        scope.release().await;
        Ok(result?.into_iter().next().map(|t| t.token))
    }
}
