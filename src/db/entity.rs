//! Static entity schema and statement builders for the mapped backend.
//!
//! Every record type declares its table and columns once through
//! [`Entity`]. The same declaration drives table creation
//! ([`create_table_sql`]), validation before insert ([`validate`]) and the
//! [`Select`], [`Insert`] and [`Delete`] builders.

use crate::error::{DbError, DbResult};
use crate::models::QueryParam;
use sqlx::FromRow;
use sqlx::sqlite::SqliteRow;

/// Storage type of a declared column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text { max_len: Option<usize> },
    Integer,
}

impl ColumnType {
    pub fn sql_name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "TEXT",
            Self::Integer => "INTEGER",
        }
    }
}

/// Declaration of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub primary_key: bool,
    pub unique: bool,
    pub nullable: bool,
    /// `(table, column)` this column references
    pub references: Option<(&'static str, &'static str)>,
}

impl ColumnDef {
    const fn new(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            primary_key: false,
            unique: false,
            nullable: false,
            references: None,
        }
    }

    pub const fn text(name: &'static str, max_len: usize) -> Self {
        Self::new(
            name,
            ColumnType::Text {
                max_len: Some(max_len),
            },
        )
    }

    pub const fn unbounded_text(name: &'static str) -> Self {
        Self::new(name, ColumnType::Text { max_len: None })
    }

    pub const fn integer(name: &'static str) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub const fn references(mut self, table: &'static str, column: &'static str) -> Self {
        self.references = Some((table, column));
        self
    }

    fn definition(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.column_type.sql_name());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if !self.nullable && !self.primary_key {
            sql.push_str(" NOT NULL");
        }
        if let Some((table, column)) = self.references {
            sql.push_str(&format!(" REFERENCES {}({})", table, column));
        }
        sql
    }
}

/// A record type mapped to one table.
pub trait Entity: for<'r> FromRow<'r, SqliteRow> + Send + Unpin + 'static {
    const TABLE: &'static str;

    fn columns() -> &'static [ColumnDef];

    /// Field values in [`columns`](Self::columns) order.
    fn values(&self) -> Vec<QueryParam>;

    /// Qualified `table.column` name.
    fn column(name: &str) -> String {
        format!("{}.{}", Self::TABLE, name)
    }

    fn validate(&self) -> DbResult<()> {
        validate(self)
    }
}

/// `CREATE TABLE IF NOT EXISTS` statement for an entity.
pub fn create_table_sql<E: Entity>() -> String {
    let columns: Vec<String> = E::columns().iter().map(ColumnDef::definition).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        E::TABLE,
        columns.join(",\n    ")
    )
}

/// Check an entity's values against its declared columns.
pub fn validate<E: Entity>(entity: &E) -> DbResult<()> {
    let columns = E::columns();
    let values = entity.values();
    if values.len() != columns.len() {
        return Err(DbError::invalid_config(format!(
            "Entity '{}' produced {} values for {} columns",
            E::TABLE,
            values.len(),
            columns.len()
        )));
    }

    for (column, value) in columns.iter().zip(&values) {
        let fail = |message: String| DbError::validation(E::TABLE, column.name, message);

        match (column.column_type, value) {
            (_, QueryParam::Null) if column.nullable => {}
            (_, QueryParam::Null) => return Err(fail("value must be given".to_string())),
            (ColumnType::Text { max_len }, QueryParam::String(text)) => {
                let len = text.chars().count();
                if let Some(max) = max_len.filter(|max| len > *max) {
                    return Err(fail(format!(
                        "must be at most {} characters, got {}",
                        max, len
                    )));
                }
            }
            (ColumnType::Integer, QueryParam::Int(_) | QueryParam::Bool(_)) => {}
            (expected, other) => {
                return Err(fail(format!(
                    "expected {}, got {}",
                    expected.sql_name().to_ascii_lowercase(),
                    other.type_name()
                )));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct Join {
    table: &'static str,
    left: String,
    right: String,
}

/// A `SELECT` over one entity table with optional inner joins.
#[derive(Debug, Clone)]
pub struct Select {
    table: &'static str,
    columns: Vec<String>,
    joins: Vec<Join>,
    filters: Vec<(String, QueryParam)>,
    min_filters: Vec<(String, QueryParam)>,
    order_by: Option<(String, bool)>,
    limit: Option<u32>,
}

impl Select {
    /// Select every declared column of `E`.
    pub fn from<E: Entity>() -> Self {
        Self {
            table: E::TABLE,
            columns: E::columns().iter().map(|c| E::column(c.name)).collect(),
            joins: Vec::new(),
            filters: Vec::new(),
            min_filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    /// Restrict the selected columns.
    pub fn only(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// `INNER JOIN J ON J.<right> = <left>`.
    pub fn inner_join<J: Entity>(mut self, left: &str, right: &str) -> Self {
        self.joins.push(Join {
            table: J::TABLE,
            left: left.to_string(),
            right: J::column(right),
        });
        self
    }

    /// `column = value`.
    pub fn filter(mut self, column: &str, value: impl Into<QueryParam>) -> Self {
        self.filters.push((column.to_string(), value.into()));
        self
    }

    /// `column >= value`.
    pub fn filter_at_least(mut self, column: &str, value: impl Into<QueryParam>) -> Self {
        self.min_filters.push((column.to_string(), value.into()));
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order_by = Some((column.to_string(), true));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn to_sql(&self) -> (String, Vec<QueryParam>) {
        let mut sql = format!("SELECT {} FROM {}", self.columns.join(", "), self.table);
        for join in &self.joins {
            sql.push_str(&format!(
                " INNER JOIN {} ON {} = {}",
                join.table, join.right, join.left
            ));
        }

        let conditions: Vec<String> = self
            .filters
            .iter()
            .map(|(c, _)| format!("{} = ?", c))
            .chain(self.min_filters.iter().map(|(c, _)| format!("{} >= ?", c)))
            .collect();
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        if let Some((column, desc)) = &self.order_by {
            sql.push_str(&format!(
                " ORDER BY {} {}",
                column,
                if *desc { "DESC" } else { "ASC" }
            ));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let params = self
            .filters
            .iter()
            .chain(&self.min_filters)
            .map(|(_, v)| v.clone())
            .collect();
        (sql, params)
    }
}

/// An `INSERT` of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    table: &'static str,
    columns: Vec<&'static str>,
    values: Vec<QueryParam>,
}

impl Insert {
    pub fn of<E: Entity>(entity: &E) -> Self {
        Self {
            table: E::TABLE,
            columns: E::columns().iter().map(|c| c.name).collect(),
            values: entity.values(),
        }
    }

    pub fn table(&self) -> &str {
        self.table
    }

    pub fn to_sql(&self) -> (String, Vec<QueryParam>) {
        let placeholders = vec!["?"; self.columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {}({}) VALUES ({})",
            self.table,
            self.columns.join(", "),
            placeholders
        );
        (sql, self.values.clone())
    }
}

/// A `DELETE` with equality filters.
#[derive(Debug, Clone)]
pub struct Delete {
    table: &'static str,
    filters: Vec<(String, QueryParam)>,
}

impl Delete {
    pub fn from<E: Entity>() -> Self {
        Self {
            table: E::TABLE,
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, column: &str, value: impl Into<QueryParam>) -> Self {
        self.filters.push((column.to_string(), value.into()));
        self
    }

    pub fn to_sql(&self) -> (String, Vec<QueryParam>) {
        let mut sql = format!("DELETE FROM {}", self.table);
        if !self.filters.is_empty() {
            let conditions: Vec<String> =
                self.filters.iter().map(|(c, _)| format!("{} = ?", c)).collect();
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        (sql, self.filters.iter().map(|(_, v)| v.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthToken, User};

    #[test]
    fn test_create_table_sql_matches_auth_schema() {
        let users = create_table_sql::<User>();
        assert!(users.starts_with("CREATE TABLE IF NOT EXISTS users"));
        assert!(users.contains("id TEXT PRIMARY KEY"));
        assert!(users.contains("name TEXT UNIQUE NOT NULL"));
        assert!(users.contains("password TEXT NOT NULL"));

        let tokens = create_table_sql::<AuthToken>();
        assert!(tokens.contains("holder_id TEXT NOT NULL REFERENCES users(id)"));
        assert!(tokens.contains("token TEXT PRIMARY KEY"));
        assert!(tokens.contains("expires INTEGER NOT NULL"));
    }

    #[test]
    fn test_validate_max_length() {
        let user = User::new("1", "a".repeat(33), "hash");
        let err = validate(&user).unwrap_err();
        assert!(matches!(
            err,
            DbError::Validation { ref field, .. } if field == "name"
        ));
        assert!(validate(&User::new("1", "alice", "hash")).is_ok());
    }

    #[test]
    fn test_select_with_join() {
        let (sql, params) = Select::from::<AuthToken>()
            .only(&["auth_tokens.holder_id", "users.name"])
            .inner_join::<User>("auth_tokens.holder_id", "id")
            .filter("auth_tokens.token", "tok")
            .to_sql();
        assert_eq!(
            sql,
            "SELECT auth_tokens.holder_id, users.name FROM auth_tokens \
             INNER JOIN users ON users.id = auth_tokens.holder_id \
             WHERE auth_tokens.token = ?"
        );
        assert_eq!(params, vec![QueryParam::from("tok")]);
    }

    #[test]
    fn test_insert_and_delete_sql() {
        let (sql, params) = Insert::of(&User::new("1", "alice", "h")).to_sql();
        assert_eq!(sql, "INSERT INTO users(id, name, password) VALUES (?, ?, ?)");
        assert_eq!(params.len(), 3);

        let (sql, params) = Delete::from::<AuthToken>().filter("token", "t").to_sql();
        assert_eq!(sql, "DELETE FROM auth_tokens WHERE token = ?");
        assert_eq!(params, vec![QueryParam::from("t")]);
    }
}
