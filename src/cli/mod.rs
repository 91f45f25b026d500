//! Query CLI and interactive prompt.

pub mod format;
pub mod runner;

pub use runner::{RunOptions, repl, run_query};

use crate::error::DbError;
use crate::models::{ParamInput, QueryParam};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("The query is not supported by the given database. Exiting...")]
    UnsupportedQuery(String),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn parse_json(text: &str) -> Option<JsonValue> {
    serde_json::from_str(text)
        .or_else(|_| serde_json::from_str(&text.replace('\'', "\"")))
        .ok()
}

/// Cast a command-line argument to a query parameter.
///
/// `None`, `True` and `False` map to null and booleans, numbers to
/// integers or floats, JSON arrays to a whole parameter row. Anything
/// else is passed as text.
pub fn cast_param(arg: &str) -> ParamInput {
    match arg {
        "None" => return ParamInput::Scalar(QueryParam::Null),
        "True" => return ParamInput::Scalar(QueryParam::Bool(true)),
        "False" => return ParamInput::Scalar(QueryParam::Bool(false)),
        _ => {}
    }
    if let Ok(i) = arg.parse::<i64>() {
        return ParamInput::Scalar(QueryParam::Int(i));
    }
    if let Ok(f) = arg.parse::<f64>() {
        return ParamInput::Scalar(QueryParam::Float(f));
    }
    match parse_json(arg) {
        Some(JsonValue::Array(values)) => {
            ParamInput::Row(values.iter().map(QueryParam::from_json).collect())
        }
        Some(JsonValue::String(s)) => ParamInput::Scalar(QueryParam::String(s)),
        _ => ParamInput::Scalar(QueryParam::String(arg.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cast_param() {
        assert_eq!(cast_param("None"), ParamInput::Scalar(QueryParam::Null));
        assert_eq!(cast_param("True"), ParamInput::Scalar(QueryParam::Bool(true)));
        assert_eq!(cast_param("42"), ParamInput::Scalar(QueryParam::Int(42)));
        assert_eq!(cast_param("2.5"), ParamInput::Scalar(QueryParam::Float(2.5)));
        assert_eq!(
            cast_param("alice"),
            ParamInput::Scalar(QueryParam::String("alice".into()))
        );
    }

    #[test]
    fn test_cast_json_array_to_row() {
        assert_eq!(
            cast_param("[\"a\", 1]"),
            ParamInput::Row(vec![QueryParam::String("a".into()), QueryParam::Int(1)])
        );
        assert_eq!(
            cast_param("['b', null]"),
            ParamInput::Row(vec![QueryParam::String("b".into()), QueryParam::Null])
        );
    }
}
