//! Connection-related data models.
//!
//! This module defines the backend selector and the configuration a
//! [`Database`](crate::db::Database) is opened from.

use crate::error::DbError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default number of pooled sessions for the mapped backend.
pub const DEFAULT_MAX_SESSIONS: u32 = 8;

/// Which facade variant executes the operations.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Literal parameterized SQL over a direct connection
    #[default]
    Raw,
    /// Entity-mapped statements over pooled sessions
    Mapped,
}

impl BackendKind {
    /// Get the display name for this backend.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Mapped => "mapped",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for BackendKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" | "sqlite" => Ok(Self::Raw),
            "mapped" | "orm" => Ok(Self::Mapped),
            other => Err(DbError::invalid_config(format!(
                "Unknown backend '{}', expected 'raw' or 'mapped'",
                other
            ))),
        }
    }
}

/// Configuration for opening a database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub backend: BackendKind,
    /// SQL script run when the database file is first created (raw backend)
    #[serde(default)]
    pub schema_file: Option<PathBuf>,
    /// Create the built-in `users` and `auth_tokens` tables
    #[serde(default)]
    pub add_user_tables: bool,
    /// Pool size of the shared engine (mapped backend)
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,
}

fn default_max_sessions() -> u32 {
    DEFAULT_MAX_SESSIONS
}

impl DatabaseConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            backend: BackendKind::Raw,
            schema_file: None,
            add_user_tables: false,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_schema_file(mut self, schema_file: impl AsRef<Path>) -> Self {
        self.schema_file = Some(schema_file.as_ref().to_path_buf());
        self
    }

    pub fn with_user_tables(mut self, add_user_tables: bool) -> Self {
        self.add_user_tables = add_user_tables;
        self
    }

    pub fn with_max_sessions(mut self, max_sessions: u32) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    /// Sibling path the backup is written to: `<stem>_backup.<ext>`.
    pub fn backup_path(&self) -> PathBuf {
        backup_path_for(&self.path)
    }
}

pub(crate) fn backup_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "database".to_string());
    let file_name = match path.extension() {
        Some(ext) => format!("{}_backup.{}", stem, ext.to_string_lossy()),
        None => format!("{}_backup", stem),
    };
    path.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_str() {
        assert_eq!("raw".parse::<BackendKind>().unwrap(), BackendKind::Raw);
        assert_eq!("MAPPED".parse::<BackendKind>().unwrap(), BackendKind::Mapped);
        assert!(matches!(
            "postgres".parse::<BackendKind>(),
            Err(DbError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_backup_path() {
        let config = DatabaseConfig::new("/data/app.db");
        assert_eq!(config.backup_path(), PathBuf::from("/data/app_backup.db"));
        assert_eq!(
            backup_path_for(Path::new("store")),
            PathBuf::from("store_backup")
        );
    }

    #[test]
    fn test_config_builder() {
        let config = DatabaseConfig::new("app.db")
            .with_backend(BackendKind::Mapped)
            .with_user_tables(true)
            .with_max_sessions(0);
        assert_eq!(config.backend, BackendKind::Mapped);
        assert!(config.add_user_tables);
        assert_eq!(config.max_sessions, 1);
    }
}
