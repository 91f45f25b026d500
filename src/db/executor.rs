//! Statement execution on a scoped connection.
//!
//! This module runs parameterized statements with support for:
//! - Single-row and batch (once per parameter row) execution
//! - Deferred commits (`commit = false` keeps the work in an open transaction)
//! - Multi-statement scripts
//!
//! Both facade variants execute through these functions, so results and
//! error kinds are identical whichever backend is active.

use crate::db::params::{BoundParams, bind_sqlite_param};
use crate::db::provider::DbConnection;
use crate::db::types::{column_names, decode_row};
use crate::error::DbResult;
use crate::models::{QueryParam, QueryRows};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, TryStreamExt};
use sqlx::sqlite::SqliteConnection;
use sqlx::{Either, Executor, Row as _};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Execute one statement, once or once per batch row.
///
/// A batch always runs inside a single transaction. With `commit` set, the
/// transaction (whether opened here or by an earlier uncommitted call) is
/// committed before returning; without it, the work stays pending on the
/// connection. On failure, a transaction opened by this call is rolled back.
pub async fn execute_statement(
    conn: &mut DbConnection,
    sql: &str,
    params: &BoundParams,
    commit: bool,
) -> DbResult<QueryRows> {
    let start = Instant::now();
    debug!(
        sql = %sql,
        executions = params.execution_count(),
        batch = params.is_batch(),
        commit,
        "Executing statement"
    );

    let owns_transaction = !conn.in_transaction() && (params.is_batch() || !commit);
    if owns_transaction {
        conn.begin().await?;
    }

    let outcome = match run(conn.as_sqlite(), sql, params).await {
        Ok(rows) if commit => conn.commit().await.map(|_| rows),
        other => other,
    };

    match outcome {
        Ok(rows) => {
            debug!(
                rows_returned = rows.row_count(),
                rows_affected = rows.rows_affected,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Statement finished"
            );
            Ok(rows)
        }
        Err(e) => {
            if owns_transaction {
                if let Err(rollback_err) = conn.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failed statement failed");
                }
            }
            Err(e)
        }
    }
}

/// Execute without any transaction handling; the statement joins whatever
/// transaction the connection holds, or autocommits.
pub async fn fetch_statement(
    conn: &mut DbConnection,
    sql: &str,
    params: &BoundParams,
) -> DbResult<QueryRows> {
    debug!(sql = %sql, executions = params.execution_count(), "Fetching statement");
    run(conn.as_sqlite(), sql, params).await
}

async fn run(conn: &mut SqliteConnection, sql: &str, params: &BoundParams) -> DbResult<QueryRows> {
    let mut out = QueryRows::default();
    match params {
        BoundParams::Single(inputs) => {
            let values = BoundParams::single_row(inputs)?;
            fetch_into(conn, sql, &values, &mut out).await?;
        }
        BoundParams::Batch(rows) => {
            for row in rows {
                let values: Vec<&QueryParam> = row.iter().collect();
                fetch_into(conn, sql, &values, &mut out).await?;
            }
        }
    }
    Ok(out)
}

fn fetch_into<'a>(
    conn: &'a mut SqliteConnection,
    sql: &'a str,
    values: &'a [&'a QueryParam],
    out: &'a mut QueryRows,
) -> BoxFuture<'a, DbResult<()>> {
    async move {
        let mut query = sqlx::query(sql);
        for value in values {
            query = bind_sqlite_param(query, value);
        }

        // `fetch_many` is the only sqlx call yielding both rows and the
        // affected-row count of one execution.
        let mut stream = conn.fetch_many(query);
        let mut columns: Option<Arc<[String]>> = None;

        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(done) => out.rows_affected += done.rows_affected(),
                Either::Right(row) => {
                    let columns = columns.get_or_insert_with(|| column_names(&row));
                    if out.columns.is_empty() {
                        out.columns = columns.to_vec();
                    }
                    out.rows.push(decode_row(&row, Arc::clone(columns)));
                }
            }
        }
        Ok(())
    }
    .boxed()
}

/// Run a multi-statement script without parameters.
///
/// The script is committed unless the connection already holds an open
/// transaction, in which case it joins it.
pub async fn execute_script(conn: &mut DbConnection, script: &str) -> DbResult<u64> {
    debug!(bytes = script.len(), "Executing script");
    let result = conn.as_sqlite().execute(sqlx::raw_sql(script)).await?;
    Ok(result.rows_affected())
}

/// Number of rows changed by the most recent write on this connection.
pub async fn last_changes(conn: &mut DbConnection) -> DbResult<u64> {
    let row = conn.as_sqlite().fetch_one("SELECT changes()").await?;
    let changes: i64 = row.try_get(0)?;
    Ok(changes.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::provider::{ConnectionProvider, SqliteFileProvider};
    use crate::{params, row};
    use serde_json::json;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> DbConnection {
        let mut conn = SqliteFileProvider::new(dir.path().join("exec.db"))
            .open()
            .await
            .unwrap();
        execute_script(
            &mut conn,
            "CREATE TABLE items (name TEXT PRIMARY KEY, qty INTEGER NOT NULL);",
        )
        .await
        .unwrap();
        conn
    }

    #[tokio::test]
    async fn test_batch_runs_once_per_row() {
        let dir = TempDir::new().unwrap();
        let mut conn = open(&dir).await;

        let batch = BoundParams::collect(params![row!["a", 1], row!["b", 2]]);
        let sql = "INSERT INTO items(name, qty) VALUES (?, ?)";
        let result = execute_statement(&mut conn, sql, &batch, true).await.unwrap();
        assert_eq!(result.rows_affected, 2);
        assert!(!conn.in_transaction());

        let select = BoundParams::collect(params![]);
        let rows = execute_statement(
            &mut conn,
            "SELECT name, qty FROM items ORDER BY name",
            &select,
            true,
        )
        .await
        .unwrap();
        assert_eq!(rows.columns, vec!["name".to_string(), "qty".to_string()]);
        assert_eq!(rows.rows[1].values(), &[json!("b"), json!(2)]);
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back() {
        let dir = TempDir::new().unwrap();
        let mut conn = open(&dir).await;

        let batch = BoundParams::collect(params![row!["a", 1], row!["a", 2]]);
        let sql = "INSERT INTO items(name, qty) VALUES (?, ?)";
        let err = execute_statement(&mut conn, sql, &batch, true).await.unwrap_err();
        assert!(err.is_unique_violation());
        assert!(!conn.in_transaction());

        let count = execute_statement(
            &mut conn,
            "SELECT COUNT(*) FROM items",
            &BoundParams::collect(params![]),
            true,
        )
        .await
        .unwrap();
        assert_eq!(count.rows[0].get_i64(0), Some(0));
    }

    #[tokio::test]
    async fn test_uncommitted_work_is_pending_until_commit() {
        let dir = TempDir::new().unwrap();
        let mut conn = open(&dir).await;

        let insert = BoundParams::collect(params!["x", 5]);
        execute_statement(&mut conn, "INSERT INTO items VALUES (?, ?)", &insert, false)
            .await
            .unwrap();
        assert!(conn.in_transaction());

        conn.rollback().await.unwrap();
        let count = execute_statement(
            &mut conn,
            "SELECT COUNT(*) FROM items",
            &BoundParams::collect(params![]),
            true,
        )
        .await
        .unwrap();
        assert_eq!(count.rows[0].get_i64(0), Some(0));
    }

    #[tokio::test]
    async fn test_last_changes_reports_write_count() {
        let dir = TempDir::new().unwrap();
        let mut conn = open(&dir).await;

        let batch = BoundParams::collect(params![row!["a", 1], row!["b", 2], row!["c", 3]]);
        execute_statement(&mut conn, "INSERT INTO items VALUES (?, ?)", &batch, true)
            .await
            .unwrap();
        let update = BoundParams::collect(params![10]);
        execute_statement(&mut conn, "UPDATE items SET qty = ?", &update, true)
            .await
            .unwrap();
        assert_eq!(last_changes(&mut conn).await.unwrap(), 3);
    }
}
