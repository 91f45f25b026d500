//! Unit-of-work sessions for the mapped backend.

use crate::db::entity::{Delete, Entity, Insert, Select};
use crate::db::executor::{execute_statement, fetch_statement};
use crate::db::params::{BoundParams, bind_sqlite_param};
use crate::db::provider::{DbConnection, ScopedConnection};
use crate::error::DbResult;
use crate::models::{ParamInput, QueryParam, QueryRows, Row};
use sqlx::Executor;
use std::future::Future;
use tracing::{debug, warn};

fn scalars(values: Vec<QueryParam>) -> BoundParams {
    BoundParams::Single(values.into_iter().map(ParamInput::Scalar).collect())
}

/// A pooled connection plus the inserts queued on it.
///
/// [`add`](Self::add) only queues; [`commit`](Self::commit) flushes the
/// queue and any pending deletes in one transaction.
#[derive(Debug)]
pub struct Session {
    conn: DbConnection,
    pending: Vec<Insert>,
    validate: bool,
}

impl Session {
    pub(crate) fn new(conn: DbConnection, validate: bool) -> Self {
        Self {
            conn,
            pending: Vec::new(),
            validate,
        }
    }

    /// Validate an entity and queue its insert.
    pub fn add<E: Entity>(&mut self, entity: &E) -> DbResult<()> {
        if self.validate {
            entity.validate()?;
        }
        self.pending.push(Insert::of(entity));
        Ok(())
    }

    /// Number of queued inserts.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Flush queued inserts and commit.
    ///
    /// On failure everything since the last commit is rolled back and the
    /// queue is cleared.
    pub async fn commit(&mut self) -> DbResult<()> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return self.conn.commit().await;
        }

        debug!(inserts = pending.len(), "Flushing session");
        self.conn.begin().await?;
        for insert in &pending {
            let (sql, values) = insert.to_sql();
            if let Err(e) = fetch_statement(&mut self.conn, &sql, &scalars(values)).await {
                self.discard().await;
                return Err(e);
            }
        }

        if let Err(e) = self.conn.commit().await {
            self.discard().await;
            return Err(e);
        }
        Ok(())
    }

    /// Drop queued inserts and roll back uncommitted work.
    pub async fn rollback(&mut self) -> DbResult<()> {
        self.pending.clear();
        self.conn.rollback().await
    }

    async fn discard(&mut self) {
        if let Err(e) = self.rollback().await {
            warn!(error = %e, "Rollback of failed flush failed");
        }
    }

    pub async fn fetch_all(&mut self, select: &Select) -> DbResult<Vec<Row>> {
        let (sql, values) = select.to_sql();
        let rows = fetch_statement(&mut self.conn, &sql, &scalars(values)).await?;
        Ok(rows.rows)
    }

    pub async fn fetch_optional(&mut self, select: &Select) -> DbResult<Option<Row>> {
        Ok(self.fetch_all(select).await?.into_iter().next())
    }

    /// Run a select and decode the rows into entities.
    pub async fn fetch_entities<E: Entity>(&mut self, select: &Select) -> DbResult<Vec<E>> {
        let (sql, values) = select.to_sql();
        let mut query = sqlx::query(&sql);
        for value in &values {
            query = bind_sqlite_param(query, value);
        }
        let rows = self.conn.as_sqlite().fetch_all(query).await?;
        Ok(rows.iter().map(E::from_row).collect::<Result<_, _>>()?)
    }

    /// Run a delete. The deletion is part of the session's work until
    /// [`commit`](Self::commit).
    pub async fn delete(&mut self, delete: &Delete) -> DbResult<u64> {
        let (sql, values) = delete.to_sql();
        self.conn.begin().await?;
        let rows = fetch_statement(&mut self.conn, &sql, &scalars(values)).await?;
        Ok(rows.rows_affected)
    }

    /// Run literal SQL on the session's connection.
    pub async fn execute_sql(
        &mut self,
        sql: &str,
        params: Vec<ParamInput>,
        commit: bool,
    ) -> DbResult<QueryRows> {
        execute_statement(&mut self.conn, sql, &BoundParams::collect(params), commit).await
    }
}

impl ScopedConnection for Session {
    fn connection(&mut self) -> &mut DbConnection {
        &mut self.conn
    }

    fn close(self) -> impl Future<Output = ()> + Send {
        if !self.pending.is_empty() {
            warn!(
                inserts = self.pending.len(),
                "Closing session with queued inserts; they are discarded"
            );
        }
        self.conn.close()
    }
}
