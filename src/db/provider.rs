//! Connection providers.
//!
//! A provider opens a new, independent physical connection each time it is
//! asked; it keeps no per-connection state. The raw backend opens direct
//! file-backed connections, the mapped backend checks sessions out of a
//! shared pool (the "engine").

use crate::db::session::Session;
use crate::error::DbResult;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{Connection, Executor, Sqlite};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// How long a connection waits on a locked database file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens physical connections for one database target.
pub trait ConnectionProvider: Send + Sync + 'static {
    type Connection: ScopedConnection;

    /// Open a new connection. Each call yields an independent connection.
    fn open(&self) -> impl Future<Output = DbResult<Self::Connection>> + Send;

    /// The database file this provider connects to.
    fn target(&self) -> &Path;
}

/// A connection object that can be cached per execution context.
pub trait ScopedConnection: Send + 'static {
    /// The underlying SQL connection.
    fn connection(&mut self) -> &mut DbConnection;

    /// Close the connection, discarding any uncommitted work.
    fn close(self) -> impl Future<Output = ()> + Send;
}

fn connect_options(path: &Path) -> SqliteConnectOptions {
    // DELETE journaling keeps every committed page in the main file, which
    // is what `create_backup` copies.
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete)
        .busy_timeout(BUSY_TIMEOUT)
}

enum Handle {
    Direct(SqliteConnection),
    Pooled(PoolConnection<Sqlite>),
}

/// A physical SQLite connection plus its explicit-transaction state.
///
/// Statements run in autocommit mode unless a transaction was opened with
/// [`begin`](Self::begin); that transaction stays open until
/// [`commit`](Self::commit) or [`rollback`](Self::rollback).
pub struct DbConnection {
    handle: Option<Handle>,
    in_transaction: bool,
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.handle {
            Some(Handle::Direct(_)) => "direct",
            Some(Handle::Pooled(_)) => "pooled",
            None => "closed",
        };
        f.debug_struct("DbConnection")
            .field("kind", &kind)
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

impl DbConnection {
    pub(crate) fn direct(conn: SqliteConnection) -> Self {
        Self {
            handle: Some(Handle::Direct(conn)),
            in_transaction: false,
        }
    }

    pub(crate) fn pooled(conn: PoolConnection<Sqlite>) -> Self {
        Self {
            handle: Some(Handle::Pooled(conn)),
            in_transaction: false,
        }
    }

    /// The sqlx connection statements execute on.
    pub fn as_sqlite(&mut self) -> &mut SqliteConnection {
        match self.handle.as_mut() {
            Some(Handle::Direct(conn)) => conn,
            Some(Handle::Pooled(conn)) => &mut **conn,
            // The handle is only taken by `close` and `drop`, both consume self.
            None => unreachable!("connection used after close"),
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Open an explicit transaction unless one is already open.
    pub async fn begin(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            self.as_sqlite().execute(sqlx::raw_sql("BEGIN")).await?;
            self.in_transaction = true;
        }
        Ok(())
    }

    /// Commit the open transaction, if any.
    pub async fn commit(&mut self) -> DbResult<()> {
        if self.in_transaction {
            self.as_sqlite().execute(sqlx::raw_sql("COMMIT")).await?;
            self.in_transaction = false;
        }
        Ok(())
    }

    /// Roll back the open transaction, if any.
    pub async fn rollback(&mut self) -> DbResult<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.as_sqlite().execute(sqlx::raw_sql("ROLLBACK")).await?;
        }
        Ok(())
    }

    /// Close the physical connection (pooled handles return to the pool).
    pub async fn close(mut self) {
        if self.in_transaction {
            warn!("Closing connection with an open transaction; uncommitted work is discarded");
            if let Err(e) = self.rollback().await {
                warn!(error = %e, "Rollback on close failed");
            }
        }

        match self.handle.take() {
            Some(Handle::Direct(conn)) => {
                if let Err(e) = conn.close().await {
                    warn!(error = %e, "Error while closing connection");
                }
            }
            Some(Handle::Pooled(conn)) => drop(conn),
            None => {}
        }
    }
}

impl Drop for DbConnection {
    fn drop(&mut self) {
        if !self.in_transaction {
            return;
        }

        warn!("Connection dropped with an open transaction; uncommitted work is discarded");
        // A pooled connection must not go back to the pool mid-transaction.
        if let Some(Handle::Pooled(conn)) = self.handle.take() {
            drop(conn.detach());
        }
    }
}

impl ScopedConnection for DbConnection {
    fn connection(&mut self) -> &mut DbConnection {
        self
    }

    fn close(self) -> impl Future<Output = ()> + Send {
        DbConnection::close(self)
    }
}

/// Opens direct file-backed connections (raw-SQL backend).
#[derive(Debug, Clone)]
pub struct SqliteFileProvider {
    path: PathBuf,
    options: SqliteConnectOptions,
}

impl SqliteFileProvider {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let options = connect_options(&path);
        Self { path, options }
    }
}

impl ConnectionProvider for SqliteFileProvider {
    type Connection = DbConnection;

    async fn open(&self) -> DbResult<DbConnection> {
        let conn = SqliteConnection::connect_with(&self.options).await?;
        debug!(path = %self.path.display(), "Opened direct connection");
        Ok(DbConnection::direct(conn))
    }

    fn target(&self) -> &Path {
        &self.path
    }
}

/// Checks sessions out of a shared engine pool (mapped backend).
#[derive(Debug, Clone)]
pub struct SessionProvider {
    path: PathBuf,
    engine: SqlitePool,
    validate_entities: bool,
}

impl SessionProvider {
    /// Create the shared engine for a database file.
    pub async fn connect(path: impl AsRef<Path>, max_sessions: u32) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let engine = SqlitePoolOptions::new()
            .max_connections(max_sessions.max(1))
            .connect_with(connect_options(&path))
            .await?;
        Ok(Self {
            path,
            engine,
            validate_entities: false,
        })
    }

    /// Whether sessions validate entities before queuing them.
    pub fn with_validation(mut self, validate_entities: bool) -> Self {
        self.validate_entities = validate_entities;
        self
    }

    pub fn engine(&self) -> &SqlitePool {
        &self.engine
    }

    /// Close the shared engine; open sessions keep working until released.
    pub async fn shutdown(&self) {
        self.engine.close().await;
    }
}

impl ConnectionProvider for SessionProvider {
    type Connection = Session;

    async fn open(&self) -> DbResult<Session> {
        let conn = self.engine.acquire().await?;
        debug!(path = %self.path.display(), "Opened session");
        Ok(Session::new(
            DbConnection::pooled(conn),
            self.validate_entities,
        ))
    }

    fn target(&self) -> &Path {
        &self.path
    }
}
