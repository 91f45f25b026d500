//! SQLite row decoding.
//!
//! Rows come back from the engine as `SqliteRow`; this module turns them into
//! positional [`Row`] values whose cells are JSON values.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the declared (or runtime) column type
//! 2. A decoder per category extracts the value

use crate::models::Row;
use serde_json::Value as JsonValue;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::sync::Arc;

/// Logical category for SQLite column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Null,
}

/// Classify a SQLite type name into a logical category.
///
/// Follows SQLite's affinity rules: anything containing "INT" is an integer,
/// "CHAR"/"CLOB"/"TEXT" is text, "BLOB" is binary, "REAL"/"FLOA"/"DOUB" is float.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let upper = type_name.to_ascii_uppercase();

    if upper == "NULL" {
        return TypeCategory::Null;
    }
    if upper == "BOOLEAN" || upper == "BOOL" {
        return TypeCategory::Boolean;
    }
    if upper.contains("INT") {
        return TypeCategory::Integer;
    }
    if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
        return TypeCategory::Text;
    }
    if upper.contains("BLOB") {
        return TypeCategory::Binary;
    }
    if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        return TypeCategory::Float;
    }
    if upper == "NUMERIC" || upper.contains("DECIMAL") {
        return TypeCategory::Float;
    }
    TypeCategory::Text
}

/// Encode binary data for a JSON cell.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

/// Column names shared by every row of one result set.
pub fn column_names(row: &SqliteRow) -> Arc<[String]> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Decode a row into positional values.
pub fn decode_row(row: &SqliteRow, columns: Arc<[String]>) -> Row {
    let values = (0..row.columns().len())
        .map(|idx| decode_column(row, idx))
        .collect();
    Row::new(columns, values)
}

fn decode_column(row: &SqliteRow, idx: usize) -> JsonValue {
    // Runtime storage class wins over the declared type: SQLite columns are
    // dynamically typed and expression columns have no declared type.
    let category = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => TypeCategory::Null,
        Ok(raw) => categorize_type(raw.type_info().name()),
        Err(_) => TypeCategory::Null,
    };

    match category {
        TypeCategory::Null => JsonValue::Null,
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => decode_boolean(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => decode_binary_col(row, idx),
        TypeCategory::Text => decode_text(row, idx),
    }
}

fn decode_integer(row: &SqliteRow, idx: usize) -> JsonValue {
    row.try_get::<Option<i64>, _>(idx)
        .ok()
        .flatten()
        .map(|v| JsonValue::Number(v.into()))
        .unwrap_or(JsonValue::Null)
}

fn decode_boolean(row: &SqliteRow, idx: usize) -> JsonValue {
    row.try_get::<Option<bool>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::Bool)
        .unwrap_or(JsonValue::Null)
}

fn decode_float(row: &SqliteRow, idx: usize) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
        return serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()));
    }
    JsonValue::Null
}

fn decode_binary_col(row: &SqliteRow, idx: usize) -> JsonValue {
    row.try_get::<Option<Vec<u8>>, _>(idx)
        .ok()
        .flatten()
        .map(|v| decode_binary_value(&v))
        .unwrap_or(JsonValue::Null)
}

fn decode_text(row: &SqliteRow, idx: usize) -> JsonValue {
    row.try_get::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::String)
        .unwrap_or(JsonValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_affinity() {
        assert_eq!(categorize_type("INTEGER"), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT"), TypeCategory::Integer);
        assert_eq!(categorize_type("NVARCHAR(32)"), TypeCategory::Text);
        assert_eq!(categorize_type("TEXT"), TypeCategory::Text);
        assert_eq!(categorize_type("BLOB"), TypeCategory::Binary);
        assert_eq!(categorize_type("REAL"), TypeCategory::Float);
        assert_eq!(categorize_type("DOUBLE PRECISION"), TypeCategory::Float);
        assert_eq!(categorize_type("BOOLEAN"), TypeCategory::Boolean);
        assert_eq!(categorize_type("NULL"), TypeCategory::Null);
    }

    #[test]
    fn test_decode_binary_value() {
        assert_eq!(
            decode_binary_value(b"hello world"),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(decode_binary_value(&[]), JsonValue::String(String::new()));
    }
}
