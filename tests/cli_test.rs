//! Integration tests for the query CLI and prompt.

use scopedb::cli::{CliError, RunOptions, repl, run_query};
use scopedb::db::{Database, UserStore};
use scopedb::models::{BackendKind, DatabaseConfig};
use tempfile::TempDir;

async fn open(dir: &TempDir, backend: BackendKind) -> Database {
    let config = DatabaseConfig::new(dir.path().join("cli.db"))
        .with_backend(backend)
        .with_user_tables(true);
    Database::open(&config).await.unwrap()
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn test_named_query_output() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, BackendKind::Raw).await;

    let created = run_query(
        &db,
        "create_user",
        &args(&["42", "alice", "hash"]),
        RunOptions::default(),
    )
    .await
    .unwrap();
    assert!(created.starts_with("Rows affected: 1 in "), "{created}");

    let found = run_query(&db, "get_user_id", &args(&["alice"]), RunOptions::default())
        .await
        .unwrap();
    // Numeric-looking arguments are cast, but the stored id stays text
    assert!(found.starts_with("\"42\"\n"), "{found}");
    assert!(found.contains("Rows returned: "));
}

#[tokio::test]
async fn test_raw_output_is_a_table() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, BackendKind::Mapped).await;
    db.create_user("1", "alice", "hash").await.unwrap();

    let options = RunOptions {
        raw: true,
        print_query: false,
    };
    let output = run_query(&db, "list_users", &[], options).await.unwrap();
    assert!(output.contains("| id | name  |"), "{output}");
    assert!(output.contains("| 1  | alice |"), "{output}");
    assert!(output.lines().last().unwrap().starts_with("Rows "));
    db.close().await;
}

#[tokio::test]
async fn test_print_query_does_not_execute() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, BackendKind::Raw).await;

    let options = RunOptions {
        raw: false,
        print_query: true,
    };
    let text = run_query(&db, "create_user", &args(&["1", "alice", "hash"]), options)
        .await
        .unwrap();
    assert_eq!(
        text,
        "INSERT INTO users(id, name, password) VALUES (1, alice, hash)\n"
    );
    assert_eq!(db.get_user_id("alice").await.unwrap(), None);
}

#[tokio::test]
async fn test_unsupported_query() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, BackendKind::Raw).await;

    let err = run_query(&db, "drop_everything", &[], RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CliError::UnsupportedQuery(_)));
    assert_eq!(
        err.to_string(),
        "The query is not supported by the given database. Exiting..."
    );
}

#[tokio::test]
async fn test_sql_script() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, BackendKind::Raw).await;
    let script = dir.path().join("seed.sql");
    tokio::fs::write(
        &script,
        "INSERT INTO users(id, name, password) VALUES ('1', 'a', 'x');\n\
         INSERT INTO users(id, name, password) VALUES ('2', 'b', 'y');",
    )
    .await
    .unwrap();

    let output = run_query(&db, script.to_str().unwrap(), &[], RunOptions::default())
        .await
        .unwrap();
    assert!(output.starts_with("Rows affected: 1 in "), "{output}");
    assert_eq!(db.get_user_id("b").await.unwrap().as_deref(), Some("2"));
}

#[tokio::test]
async fn test_repl_session() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, BackendKind::Raw).await;

    let input = "CREATE TABLE kv (k TEXT, v INTEGER)\n\
                 INSERT INTO kv VALUES ('a', 1)\n\
                 SELECT k, v FROM kv\n\
                 SELECT nonsense FROM nowhere\n\
                 run get_user_id alice\n\
                 quit\n\
                 SELECT 1\n";
    let mut out = Vec::new();
    repl(&db, input.as_bytes(), &mut out).await.unwrap();

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("Rows affected: 1 in "), "{text}");
    assert!(text.contains("| a | 1 |"), "{text}");
    assert!(text.contains("Rows returned: 1 in "), "{text}");
    assert!(text.contains("Error during query: "), "{text}");
    // Nothing after `quit` runs
    assert_eq!(text.matches("Rows returned").count(), 1);
}
