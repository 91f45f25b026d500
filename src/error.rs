//! Error types for the data-access layer.
//!
//! This module defines all error types using `thiserror`. Engine and file-system
//! failures collapse into the single [`DbError::Database`] kind so callers only
//! need to branch on one variant, whichever backend is active.

use thiserror::Error;

/// Constraint classification reported by the engine alongside a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    NotNull,
    Check,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {message}")]
    Database {
        message: String,
        /// SQLite extended result code, e.g. "2067" for a UNIQUE violation
        code: Option<String>,
        constraint: Option<ConstraintKind>,
        suggestion: String,
    },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Validation failed for {entity}.{field}: {message}")]
    Validation {
        entity: String,
        field: String,
        message: String,
    },
}

impl DbError {
    /// Create a database error with a helpful suggestion.
    pub fn database(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: None,
            constraint: None,
            suggestion: suggestion.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a validation error for a single entity field.
    pub fn validation(
        entity: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            entity: entity.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// The constraint the engine reported as violated, if any.
    pub fn constraint(&self) -> Option<ConstraintKind> {
        match self {
            Self::Database { constraint, .. } => *constraint,
            _ => None,
        }
    }

    /// Check if this error is a UNIQUE or PRIMARY KEY violation.
    pub fn is_unique_violation(&self) -> bool {
        self.constraint() == Some(ConstraintKind::Unique)
    }
}

/// Convert sqlx errors to the uniform database error kind.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let constraint = match db_err.kind() {
                    sqlx::error::ErrorKind::UniqueViolation => Some(ConstraintKind::Unique),
                    sqlx::error::ErrorKind::ForeignKeyViolation => {
                        Some(ConstraintKind::ForeignKey)
                    }
                    sqlx::error::ErrorKind::NotNullViolation => Some(ConstraintKind::NotNull),
                    sqlx::error::ErrorKind::CheckViolation => Some(ConstraintKind::Check),
                    _ => None,
                };
                let suggestion = match constraint {
                    Some(_) => "The statement violates a table constraint",
                    None => "Check the SQL syntax and referenced objects",
                };
                DbError::Database {
                    message: db_err.message().to_string(),
                    code: db_err.code().map(|c| c.to_string()),
                    constraint,
                    suggestion: suggestion.to_string(),
                }
            }
            sqlx::Error::Configuration(msg) => DbError::database(
                msg.to_string(),
                "Check the database path and connect options",
            ),
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::database(
                "Timed out acquiring a pooled connection",
                "Release idle sessions or raise the pool size",
            ),
            sqlx::Error::PoolClosed => {
                DbError::database("Connection pool is closed", "Reopen the database")
            }
            sqlx::Error::Io(io_err) => DbError::database(
                format!("I/O error: {}", io_err),
                "Check that the database file is reachable and writable",
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::database(
                format!("Column not found: {}", col),
                "Check the selected column names",
            ),
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::database(
                format!("Column index {} out of bounds (len: {})", index, len),
                "Check the number of selected columns",
            ),
            sqlx::Error::ColumnDecode { index, source } => DbError::database(
                format!("Failed to decode column {}: {}", index, source),
                "Check the declared column types",
            ),
            sqlx::Error::Decode(source) => DbError::database(
                format!("Decode error: {}", source),
                "Check the declared column types",
            ),
            sqlx::Error::WorkerCrashed => DbError::database(
                "Database worker crashed",
                "Reopen the database connection",
            ),
            _ => DbError::database(
                format!("Unknown database error: {}", err),
                "Inspect the engine logs",
            ),
        }
    }
}

/// File-system failures (backups, schema scripts) share the database error kind.
impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        DbError::database(
            format!("I/O error: {}", err),
            "Check file permissions and available disk space",
        )
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
