//! Query-related data models.
//!
//! This module defines parameter values, decoded rows and the shaped
//! output returned by [`Query`](crate::db::Query) execution.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Convert a scalar JSON value into a parameter.
    ///
    /// Arrays and objects are stored as their JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => Self::String(s.clone()),
            other => Self::String(other.to_string()),
        }
    }
}

impl fmt::Display for QueryParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Bytes(v) => write!(f, "x'{}'", hex::encode(v)),
        }
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u32> for QueryParam {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&String> for QueryParam {
    fn from(v: &String) -> Self {
        Self::String(v.clone())
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// One positional argument handed to a query.
///
/// A `Row` is a whole parameter tuple: a query whose arguments are all rows
/// runs once per row.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamInput {
    Scalar(QueryParam),
    Row(Vec<QueryParam>),
}

macro_rules! impl_scalar_input {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for ParamInput {
                fn from(v: $ty) -> Self {
                    Self::Scalar(v.into())
                }
            }
        )+
    };
}

impl_scalar_input!(QueryParam, bool, i64, i32, u32, f64, &str, String, &String);

impl<T: Into<QueryParam>> From<Option<T>> for ParamInput {
    fn from(v: Option<T>) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<Vec<QueryParam>> for ParamInput {
    fn from(v: Vec<QueryParam>) -> Self {
        Self::Row(v)
    }
}

impl ParamInput {
    /// Build a row argument from anything that yields parameters.
    pub fn row<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<QueryParam>,
    {
        Self::Row(values.into_iter().map(Into::into).collect())
    }
}

/// Build a `Vec<ParamInput>` from a list of values.
///
/// ```ignore
/// let single = params!["alice", 42];
/// let batch = params![row!["a", 1], row!["b", 2]];
/// ```
#[macro_export]
macro_rules! params {
    () => { ::std::vec::Vec::<$crate::models::ParamInput>::new() };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::models::ParamInput::from($value)),+]
    };
}

/// Build a row argument for batch execution.
#[macro_export]
macro_rules! row {
    ($($value:expr),* $(,)?) => {
        $crate::models::ParamInput::Row(vec![$($crate::models::QueryParam::from($value)),*])
    };
}

/// A decoded result row with positional values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<JsonValue>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<JsonValue>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[JsonValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<JsonValue> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&JsonValue> {
        self.values.get(idx)
    }

    /// Look a value up by column name.
    pub fn get_named(&self, column: &str) -> Option<&JsonValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn get_str(&self, idx: usize) -> Option<&str> {
        self.get(idx).and_then(JsonValue::as_str)
    }

    pub fn get_i64(&self, idx: usize) -> Option<i64> {
        self.get(idx).and_then(JsonValue::as_i64)
    }

    /// Take the first column's value.
    pub fn into_first(self) -> Option<JsonValue> {
        self.values.into_iter().next()
    }
}

/// The unshaped result of one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Sum over every executed row for batch queries
    pub rows_affected: u64,
}

impl QueryRows {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The shaped result of a query call.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    /// Unshaped result (raw mode or no format selected)
    Raw(QueryRows),
    /// Every row (`all`)
    Rows(Vec<Row>),
    /// The first row (`one`)
    Row(Option<Row>),
    /// First column of every row (`unpack_all`)
    Values(Vec<JsonValue>),
    /// First column of the first row (`unpack_one`)
    Value(Option<JsonValue>),
    /// Output of a caller-supplied formatter
    Custom(JsonValue),
}

impl QueryOutput {
    /// Collect the output into rows, whatever shape it has.
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Self::Raw(raw) => raw.rows,
            Self::Rows(rows) => rows,
            Self::Row(row) => row.into_iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn into_row(self) -> Option<Row> {
        match self {
            Self::Raw(raw) => raw.rows.into_iter().next(),
            Self::Rows(rows) => rows.into_iter().next(),
            Self::Row(row) => row,
            _ => None,
        }
    }

    pub fn into_values(self) -> Vec<JsonValue> {
        match self {
            Self::Values(values) => values,
            Self::Value(value) => value.into_iter().collect(),
            Self::Custom(JsonValue::Array(values)) => values,
            other => other
                .into_rows()
                .into_iter()
                .filter_map(Row::into_first)
                .collect(),
        }
    }

    pub fn into_value(self) -> Option<JsonValue> {
        match self {
            Self::Value(value) => value,
            Self::Values(values) => values.into_iter().next(),
            Self::Custom(value) => Some(value),
            other => other.into_row().and_then(Row::into_first),
        }
    }

    /// Convenience for single text results such as ids.
    pub fn into_string(self) -> Option<String> {
        match self.into_value()? {
            JsonValue::String(s) => Some(s),
            JsonValue::Null => None,
            other => Some(other.to_string()),
        }
    }
}
