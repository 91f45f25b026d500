//! Parameter binding utilities for database queries.
//!
//! This module binds `QueryParam` values to SQLite query objects and
//! normalizes positional arguments into single-row or batch form.

use crate::error::{DbError, DbResult};
use crate::models::{ParamInput, QueryParam};
use sqlx::Sqlite;
use sqlx::sqlite::SqliteArguments;

/// Collected arguments of one query.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundParams {
    /// One execution with a flat parameter tuple
    Single(Vec<ParamInput>),
    /// One execution per row
    Batch(Vec<Vec<QueryParam>>),
}

impl BoundParams {
    /// Collect positional arguments.
    ///
    /// When at least one argument was given and every argument is a row, the
    /// query runs once per row; otherwise it is a single-row execution.
    pub fn collect(params: Vec<ParamInput>) -> Self {
        let all_rows = !params.is_empty() && params.iter().all(|p| matches!(p, ParamInput::Row(_)));
        if !all_rows {
            return Self::Single(params);
        }

        Self::Batch(
            params
                .into_iter()
                .filter_map(|p| match p {
                    ParamInput::Row(row) => Some(row),
                    ParamInput::Scalar(_) => None,
                })
                .collect(),
        )
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }

    /// Number of executions this set of parameters causes.
    pub fn execution_count(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(rows) => rows.len(),
        }
    }

    /// Every value in left-to-right order, rows flattened.
    pub fn flattened(&self) -> Vec<&QueryParam> {
        match self {
            Self::Single(params) => params
                .iter()
                .flat_map(|p| match p {
                    ParamInput::Scalar(v) => std::slice::from_ref(v).iter(),
                    ParamInput::Row(row) => row.iter(),
                })
                .collect(),
            Self::Batch(rows) => rows.iter().flatten().collect(),
        }
    }

    /// The flat scalar tuple of a single-row execution.
    ///
    /// A row argument mixed with scalars cannot be bound to one statement.
    pub fn single_row(params: &[ParamInput]) -> DbResult<Vec<&QueryParam>> {
        params
            .iter()
            .enumerate()
            .map(|(idx, p)| match p {
                ParamInput::Scalar(v) => Ok(v),
                ParamInput::Row(_) => Err(DbError::invalid_config(format!(
                    "Parameter {} is a sequence but the query is not a batch \
                     (batch queries need every parameter to be a sequence)",
                    idx + 1
                ))),
            })
            .collect()
    }
}

/// Bind a parameter to a SQLite query.
///
/// Values are bound owned so the arguments never borrow from the caller's
/// parameter list.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.clone()),
        QueryParam::Bytes(v) => query.bind(v.clone()),
    }
}
