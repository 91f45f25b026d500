//! Deferred, parameterized queries.
//!
//! A [`Query`] captures SQL text, its positional arguments, and how the
//! result is shaped. Nothing touches the database until [`Query::call`]:
//! the call enters a scope on the query's context, executes, and releases
//! the scope again on every exit path.

use crate::db::context::ContextManager;
use crate::db::executor::execute_statement;
use crate::db::params::BoundParams;
use crate::db::provider::{ConnectionProvider, ScopedConnection, SqliteFileProvider};
use crate::error::{DbError, DbResult};
use crate::models::{ParamInput, QueryOutput, QueryRows, Row};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Caller-supplied result formatter.
pub type FormatFn = Arc<dyn Fn(&QueryRows) -> DbResult<JsonValue> + Send + Sync>;

/// How the result of a query call is shaped.
#[derive(Clone, Default)]
pub enum ResultFormat {
    /// The unshaped result
    #[default]
    Raw,
    /// Every row
    All,
    /// The first row
    One,
    /// The first column of every row
    UnpackAll,
    /// The first column of the first row
    UnpackOne,
    Custom(FormatFn),
    /// An unrecognized selector; calling the query fails
    Unknown(String),
}

impl ResultFormat {
    /// Wrap a formatter closure.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&QueryRows) -> DbResult<JsonValue> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Raw => "raw",
            Self::All => "all",
            Self::One => "one",
            Self::UnpackAll => "unpack_all",
            Self::UnpackOne => "unpack_one",
            Self::Custom(_) => "custom",
            Self::Unknown(name) => name,
        }
    }

    fn check(&self) -> DbResult<()> {
        match self {
            Self::Unknown(name) => Err(DbError::invalid_config(format!(
                "Formatting function for query is invalid: '{}' \
                 (expected all, one, unpack_all or unpack_one)",
                name
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for ResultFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(_) => f.write_str("Custom(..)"),
            Self::Unknown(name) => f.debug_tuple("Unknown").field(name).finish(),
            other => f.write_str(other.name()),
        }
    }
}

impl From<&str> for ResultFormat {
    fn from(s: &str) -> Self {
        match s {
            "" | "raw" | "none" => Self::Raw,
            "all" => Self::All,
            "one" => Self::One,
            "unpack_all" => Self::UnpackAll,
            "unpack_one" => Self::UnpackOne,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl FromStr for ResultFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

/// One deferred unit of execution.
pub struct Query<P: ConnectionProvider = SqliteFileProvider> {
    sql: String,
    params: BoundParams,
    format: ResultFormat,
    default: Option<QueryOutput>,
    context: Arc<ContextManager<P>>,
}

impl<P: ConnectionProvider> fmt::Debug for Query<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("sql", &self.sql)
            .field("params", &self.params)
            .field("format", &self.format)
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

impl<P: ConnectionProvider> Query<P> {
    /// Build a query; when every argument is a row, it runs as a batch.
    pub fn new(
        context: Arc<ContextManager<P>>,
        sql: impl Into<String>,
        params: Vec<ParamInput>,
    ) -> Self {
        Self {
            sql: sql.into(),
            params: BoundParams::collect(params),
            format: ResultFormat::Raw,
            default: None,
            context,
        }
    }

    pub fn format(mut self, format: impl Into<ResultFormat>) -> Self {
        self.format = format.into();
        self
    }

    /// Value returned by the `all`/`one`/`unpack_*` formats when nothing matched.
    pub fn default_value(mut self, default: QueryOutput) -> Self {
        self.default = Some(default);
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &BoundParams {
        &self.params
    }

    pub fn is_batch(&self) -> bool {
        self.params.is_batch()
    }

    pub fn result_format(&self) -> &ResultFormat {
        &self.format
    }

    /// Execute the query.
    ///
    /// With `commit` unset the statement stays in an open transaction on the
    /// context's connection. `raw` skips result shaping.
    pub async fn call(&self, commit: bool, raw: bool) -> DbResult<QueryOutput> {
        if !raw {
            self.format.check()?;
        }

        let scope = self.context.enter().await?;
        let result = {
            let mut conn = scope.lock().await;
            execute_statement(conn.connection(), &self.sql, &self.params, commit).await
        };
        scope.release().await;

        let rows = result?;
        if raw {
            return Ok(QueryOutput::Raw(rows));
        }
        self.shape(rows)
    }

    /// Execute, commit and shape.
    pub async fn run(&self) -> DbResult<QueryOutput> {
        self.call(true, false).await
    }

    /// Execute, commit and return the unshaped result.
    pub async fn fetch_raw(&self) -> DbResult<QueryRows> {
        match self.call(true, true).await? {
            QueryOutput::Raw(rows) => Ok(rows),
            _ => Ok(QueryRows::default()),
        }
    }

    fn shape(&self, rows: QueryRows) -> DbResult<QueryOutput> {
        let QueryRows {
            rows: mut all_rows, ..
        } = match &self.format {
            ResultFormat::Raw => return Ok(QueryOutput::Raw(rows)),
            ResultFormat::Custom(f) => return f(&rows).map(QueryOutput::Custom),
            ResultFormat::Unknown(_) => {
                self.format.check()?;
                return Ok(QueryOutput::Raw(rows));
            }
            _ => rows,
        };

        if all_rows.is_empty() {
            return Ok(self.default.clone().unwrap_or_else(|| self.empty_output()));
        }

        let output = match self.format {
            ResultFormat::All => QueryOutput::Rows(all_rows),
            ResultFormat::One => QueryOutput::Row(Some(all_rows.swap_remove(0))),
            ResultFormat::UnpackAll => QueryOutput::Values(
                all_rows
                    .into_iter()
                    .map(|r| r.into_first().unwrap_or(JsonValue::Null))
                    .collect(),
            ),
            _ => QueryOutput::Value(Some(
                all_rows
                    .swap_remove(0)
                    .into_first()
                    .unwrap_or(JsonValue::Null),
            )),
        };
        Ok(output)
    }

    fn empty_output(&self) -> QueryOutput {
        match self.format {
            ResultFormat::All => QueryOutput::Rows(Vec::<Row>::new()),
            ResultFormat::One => QueryOutput::Row(None),
            ResultFormat::UnpackAll => QueryOutput::Values(Vec::new()),
            _ => QueryOutput::Value(None),
        }
    }
}

/// Diagnostic rendering: each `?` replaced left-to-right by its argument.
///
/// Never used for execution.
impl<P: ConnectionProvider> fmt::Display for Query<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = match &self.params {
            BoundParams::Single(inputs) => inputs
                .iter()
                .map(|input| match input {
                    ParamInput::Scalar(v) => v.to_string(),
                    ParamInput::Row(row) => render_row(row),
                })
                .collect(),
            BoundParams::Batch(rows) => rows.iter().map(|r| render_row(r)).collect(),
        };

        let mut text = self.sql.clone();
        for value in rendered {
            text = text.replacen('?', &value, 1);
        }
        f.write_str(&text)
    }
}

fn render_row(row: &[crate::models::QueryParam]) -> String {
    let values: Vec<String> = row.iter().map(ToString::to_string).collect();
    format!("({})", values.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::executor::execute_script;
    use crate::{params, row};
    use serde_json::json;
    use tempfile::TempDir;

    async fn context(dir: &TempDir) -> Arc<ContextManager<SqliteFileProvider>> {
        let context = ContextManager::new(SqliteFileProvider::new(dir.path().join("q.db")));
        let scope = context.enter().await.unwrap();
        execute_script(
            scope.lock().await.connection(),
            "CREATE TABLE kv (k TEXT PRIMARY KEY, v INTEGER);",
        )
        .await
        .unwrap();
        scope.release().await;
        context
    }

    #[test]
    fn test_format_from_str() {
        assert!(matches!(ResultFormat::from("all"), ResultFormat::All));
        assert!(matches!(ResultFormat::from("unpack_one"), ResultFormat::UnpackOne));
        assert!(matches!(ResultFormat::from("bogus"), ResultFormat::Unknown(ref n) if n == "bogus"));
    }

    #[tokio::test]
    async fn test_display_substitutes_params() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;

        let q = Query::new(ctx.clone(), "SELECT * FROM kv WHERE k = ? AND v = ?", params!["a", 1]);
        assert_eq!(q.to_string(), "SELECT * FROM kv WHERE k = a AND v = 1");

        let batch = Query::new(ctx, "INSERT INTO kv VALUES ?", params![row!["a", 1], row!["b", 2]]);
        assert!(batch.is_batch());
        assert_eq!(batch.to_string(), "INSERT INTO kv VALUES (a, 1)");
    }

    #[tokio::test]
    async fn test_format_selectors_on_empty_result() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;
        let sql = "SELECT v FROM kv WHERE k = ?";

        let all = Query::new(ctx.clone(), sql, params!["none"]).format("all");
        assert_eq!(all.run().await.unwrap(), QueryOutput::Rows(Vec::new()));

        let with_default = Query::new(ctx.clone(), sql, params!["none"])
            .format("unpack_one")
            .default_value(QueryOutput::Value(Some(json!(-1))));
        assert_eq!(
            with_default.run().await.unwrap(),
            QueryOutput::Value(Some(json!(-1)))
        );

        let one = Query::new(ctx, sql, params!["none"]).format("one");
        assert_eq!(one.run().await.unwrap(), QueryOutput::Row(None));
    }

    #[tokio::test]
    async fn test_unknown_format_fails_without_executing() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;

        let q = Query::new(ctx.clone(), "INSERT INTO kv VALUES (?, ?)", params!["a", 1])
            .format("first");
        assert!(matches!(q.run().await, Err(DbError::InvalidConfig { .. })));
        assert_eq!(ctx.stats().opened, 1);

        let count = Query::new(ctx, "SELECT COUNT(*) FROM kv", params![]).format("unpack_one");
        assert_eq!(count.run().await.unwrap().into_value(), Some(json!(0)));
    }

    #[tokio::test]
    async fn test_custom_formatter() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;
        Query::new(ctx.clone(), "INSERT INTO kv VALUES (?, ?)", params![row!["a", 1], row!["b", 2]])
            .run()
            .await
            .unwrap();

        let q = Query::new(ctx, "SELECT v FROM kv", params![])
            .format(ResultFormat::custom(|rows| Ok(json!(rows.row_count()))));
        assert_eq!(q.run().await.unwrap(), QueryOutput::Custom(json!(2)));
    }
}
