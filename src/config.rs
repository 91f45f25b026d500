//! Configuration handling for the scopedb CLI.
//!
//! This module provides configuration management via CLI arguments and environment variables.

use crate::auth::Secrets;
use crate::error::DbResult;
use crate::models::{BackendKind, DEFAULT_MAX_SESSIONS, DatabaseConfig};
use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Debug, Clone, Parser)]
#[command(
    name = "scopedb",
    about = "Run named queries or SQL scripts against a SQLite store, or open a query REPL",
    version,
    author
)]
pub struct Config {
    /// Path of the SQLite database file
    #[arg(short = 'd', long = "database", value_name = "PATH", env = "SCOPEDB_DATABASE")]
    pub database: PathBuf,

    /// Backend executing the queries (raw or mapped)
    #[arg(
        short,
        long,
        value_enum,
        default_value = "raw",
        env = "SCOPEDB_BACKEND"
    )]
    pub backend: BackendKind,

    /// SQL script run when the database file is first created
    #[arg(long, value_name = "PATH", env = "SCOPEDB_SCHEMA")]
    pub schema: Option<PathBuf>,

    /// Create the built-in users and auth_tokens tables on first creation
    #[arg(long, env = "SCOPEDB_USER_TABLES")]
    pub user_tables: bool,

    /// Pool size of the mapped backend
    #[arg(long, default_value_t = DEFAULT_MAX_SESSIONS, env = "SCOPEDB_MAX_SESSIONS")]
    pub max_sessions: u32,

    /// JSON file holding the token and password salts.
    ///
    /// The query tool never hashes anything, so the file is only checked to
    /// be well-formed before the database is opened.
    #[arg(long, value_name = "PATH", env = "SCOPEDB_SECRETS")]
    pub secrets: Option<PathBuf>,

    /// Print unshaped rows as a table
    #[arg(long, env = "SCOPEDB_RAW")]
    pub raw: bool,

    /// Only print the rendered query text
    #[arg(long, env = "SCOPEDB_PRINT_QUERY")]
    pub print_query: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "SCOPEDB_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "SCOPEDB_JSON_LOGS")]
    pub json_logs: bool,

    /// Named query or `.sql` script, followed by its parameters.
    /// Without it an interactive prompt is started.
    #[arg(value_name = "QUERY")]
    pub query: Vec<String>,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Library-level configuration of the database to open.
    pub fn to_database_config(&self) -> DatabaseConfig {
        let mut config = DatabaseConfig::new(&self.database)
            .with_backend(self.backend)
            .with_user_tables(self.user_tables)
            .with_max_sessions(self.max_sessions);
        if let Some(schema) = &self.schema {
            config = config.with_schema_file(schema);
        }
        config
    }

    /// Load the secrets file named by `--secrets`, if any.
    pub async fn load_secrets(&self) -> DbResult<Option<Secrets>> {
        match &self.secrets {
            Some(path) => Secrets::load(path).await.map(Some),
            None => Ok(None),
        }
    }

    /// Split the positional arguments into the query and its parameters.
    ///
    /// A `.sql` script takes no parameters.
    pub fn query_and_params(&self) -> Option<(&str, &[String])> {
        let (query, params) = self.query.split_first()?;
        if query.ends_with(".sql") {
            Some((query.as_str(), &[]))
        } else {
            Some((query.as_str(), params))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["scopedb", "-d", "app.db"]).unwrap();
        assert_eq!(config.backend, BackendKind::Raw);
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(config.query_and_params().is_none());
        assert!(!config.raw);
    }

    #[test]
    fn test_query_and_params() {
        let config = Config::try_parse_from([
            "scopedb",
            "--database",
            "app.db",
            "--backend",
            "mapped",
            "get_user_id",
            "alice",
        ])
        .unwrap();
        assert_eq!(config.backend, BackendKind::Mapped);
        let (query, params) = config.query_and_params().unwrap();
        assert_eq!(query, "get_user_id");
        assert_eq!(params, ["alice".to_string()]);
    }

    #[test]
    fn test_sql_script_ignores_params() {
        let config =
            Config::try_parse_from(["scopedb", "-d", "app.db", "setup.sql", "extra"]).unwrap();
        let (query, params) = config.query_and_params().unwrap();
        assert_eq!(query, "setup.sql");
        assert!(params.is_empty());
    }

    #[test]
    fn test_to_database_config() {
        let config = Config::try_parse_from([
            "scopedb",
            "-d",
            "app.db",
            "--schema",
            "schema.sql",
            "--user-tables",
        ])
        .unwrap();
        let db = config.to_database_config();
        assert_eq!(db.path, PathBuf::from("app.db"));
        assert_eq!(db.schema_file, Some(PathBuf::from("schema.sql")));
        assert!(db.add_user_tables);
    }

    #[tokio::test]
    async fn test_load_secrets() {
        let dir = tempfile::TempDir::new().unwrap();
        let none = Config::try_parse_from(["scopedb", "-d", "app.db"]).unwrap();
        assert!(none.load_secrets().await.unwrap().is_none());

        let good = dir.path().join("secrets.json");
        tokio::fs::write(&good, r#"{"auth_token_salt": "t", "password_salt": "p"}"#)
            .await
            .unwrap();
        let config =
            Config::try_parse_from(["scopedb", "-d", "app.db", "--secrets", good.to_str().unwrap()])
                .unwrap();
        let secrets = config.load_secrets().await.unwrap().unwrap();
        assert_eq!(secrets.password_salt, "p");

        let bad = dir.path().join("bad.json");
        tokio::fs::write(&bad, "not json").await.unwrap();
        let config =
            Config::try_parse_from(["scopedb", "-d", "app.db", "--secrets", bad.to_str().unwrap()])
                .unwrap();
        assert!(matches!(
            config.load_secrets().await,
            Err(crate::error::DbError::InvalidConfig { .. })
        ));
    }
}
