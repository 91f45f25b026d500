//! Integration tests for per-context connection scopes.
//!
//! Tests verify that:
//! - Nested scopes of one task reuse a single connection
//! - The connection is closed on the final exit only
//! - Independent tasks never share a connection
//! - Uncommitted work stays invisible to other contexts until committed

use scopedb::db::{Database, SqliteDatabase, UserStore};
use scopedb::models::{BackendKind, DatabaseConfig};
use scopedb::params;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

async fn open_raw(dir: &TempDir) -> SqliteDatabase {
    let config = DatabaseConfig::new(dir.path().join("ctx.db")).with_user_tables(true);
    SqliteDatabase::open(&config).await.unwrap()
}

async fn count_users(db: &SqliteDatabase) -> i64 {
    db.query("SELECT COUNT(*) FROM users", params![])
        .format("unpack_one")
        .run()
        .await
        .unwrap()
        .into_value()
        .and_then(|v| v.as_i64())
        .unwrap()
}

fn assert_send<T: Send>(_: T) {}

#[tokio::test]
async fn test_store_futures_are_send() {
    for backend in [BackendKind::Raw, BackendKind::Mapped] {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig::new(dir.path().join("send.db"))
            .with_backend(backend)
            .with_user_tables(true);
        let db = Database::open(&config).await.unwrap();

        assert_send(db.create_user("1", "alice", "hash"));
        assert_send(db.password_matches("alice", "hash"));
        assert_send(db.save_auth_token("t", "1", 60));
        assert_send(db.get_user_id_from_token("t"));
        assert_send(db.get_auth_token("1"));
        assert_send(db.query("SELECT 1", params![]).call(true, false));
        assert_send(db.scope());

        // Every operation also runs to completion on a spawned task
        let db = Arc::new(db);
        let store = Arc::clone(&db);
        let created = tokio::spawn(async move {
            let created = store.create_user("1", "alice", "hash").await.unwrap();
            store.save_auth_token("t", "1", 60).await.unwrap();
            created
        })
        .await
        .unwrap();
        assert!(created, "{backend}");
        assert!(db.get_user_id_from_token("t").await.unwrap().is_some());
        db.close().await;
    }
}

#[tokio::test]
async fn test_nested_scopes_share_one_connection() {
    let dir = TempDir::new().unwrap();
    let db = open_raw(&dir).await;
    let before = db.context().stats();

    let outer = db.scope().await.unwrap();
    let inner = db.scope().await.unwrap();
    assert_eq!(db.context().depth(), 2);
    assert_eq!(outer.context(), inner.context());

    // Temp tables only exist on the connection that created them
    db.query("CREATE TEMP TABLE scratch (v INTEGER)", params![])
        .run()
        .await
        .unwrap();
    db.query("INSERT INTO scratch VALUES (?)", params![7])
        .run()
        .await
        .unwrap();

    inner.release().await;
    assert_eq!(db.context().depth(), 1);

    let value = db
        .query("SELECT v FROM scratch", params![])
        .format("unpack_one")
        .run()
        .await
        .unwrap()
        .into_value();
    assert_eq!(value, Some(json!(7)));

    outer.release().await;
    assert!(!db.context().is_active());

    let after = db.context().stats();
    assert_eq!(after.opened - before.opened, 1);
    assert_eq!(after.closed - before.closed, 1);
    assert_eq!(after.active_contexts, 0);

    // A new outermost scope opens a fresh connection without the temp table
    assert!(
        db.query("SELECT v FROM scratch", params![])
            .run()
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_dropped_guard_leaves_scope() {
    let dir = TempDir::new().unwrap();
    let db = open_raw(&dir).await;

    {
        let _outer = db.scope().await.unwrap();
        let _inner = db.scope().await.unwrap();
        assert_eq!(db.context().depth(), 2);
    }

    assert_eq!(db.context().depth(), 0);
    assert_eq!(db.context().stats().active_contexts, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spawned_tasks_get_separate_connections() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(open_raw(&dir).await);
    let before = db.context().stats();
    let barrier = Arc::new(tokio::sync::Barrier::new(2));

    let mut handles = Vec::new();
    for n in 0..2i64 {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            let scope = db.scope().await.unwrap();
            db.query("CREATE TEMP TABLE mine (v INTEGER)", params![])
                .run()
                .await
                .unwrap();
            db.query("INSERT INTO mine VALUES (?)", params![n])
                .run()
                .await
                .unwrap();

            // Both scopes are open at the same time here
            barrier.wait().await;

            let values = db
                .query("SELECT v FROM mine", params![])
                .format("unpack_all")
                .run()
                .await
                .unwrap()
                .into_values();
            let context = scope.context();
            scope.release().await;
            (context, values)
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert_ne!(results[0].0, results[1].0);
    assert_eq!(results[0].1, vec![json!(0)]);
    assert_eq!(results[1].1, vec![json!(1)]);

    let after = db.context().stats();
    assert_eq!(after.opened - before.opened, 2);
    assert_eq!(after.active_contexts, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_uncommitted_work_is_invisible_to_other_tasks() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(open_raw(&dir).await);

    let scope = db.scope().await.unwrap();
    db.query(
        "INSERT INTO users(id, name, password) VALUES (?, ?, ?)",
        params!["1", "alice", "hash"],
    )
    .call(false, false)
    .await
    .unwrap();

    let other = Arc::clone(&db);
    let seen = tokio::spawn(async move { count_users(&other).await })
        .await
        .unwrap();
    assert_eq!(seen, 0);

    scope.commit().await.unwrap();

    let other = Arc::clone(&db);
    let seen = tokio::spawn(async move { count_users(&other).await })
        .await
        .unwrap();
    assert_eq!(seen, 1);

    scope.release().await;
}

#[tokio::test]
async fn test_release_rolls_back_uncommitted_work() {
    let dir = TempDir::new().unwrap();
    let db = open_raw(&dir).await;

    let scope = db.scope().await.unwrap();
    db.query(
        "INSERT INTO users(id, name, password) VALUES (?, ?, ?)",
        params!["1", "alice", "hash"],
    )
    .call(false, false)
    .await
    .unwrap();
    scope.release().await;

    assert_eq!(count_users(&db).await, 0);
}
