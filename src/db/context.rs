//! Reentrant, per-execution-context connection management.
//!
//! Each execution context (a tokio task, or a plain thread outside the
//! runtime) holds at most one physical connection. Entering a scope again
//! from the same context reuses that connection and bumps a depth counter;
//! the connection is closed when the outermost scope exits.
//!
//! # Concurrency Safety
//!
//! - The context map is the only shared state. It is guarded by a
//!   `std::sync::Mutex` that is never held across an await point.
//! - Connections are opened outside the lock. The entry is committed under
//!   the lock after a re-check, so a failed open leaves no depth behind and
//!   a racing open within the same context never leaks a second connection.
//! - Each connection sits behind its own `tokio::sync::Mutex`, so nested
//!   scopes of one context (e.g. futures joined within a task) serialize
//!   statement execution on the shared connection.
//!
//! # Panic Safety
//!
//! [`ScopeGuard`] releases its scope on drop, so the depth counter is
//! decremented on every exit path. Prefer [`ScopeGuard::release`], which
//! also closes the connection gracefully on the final exit.

use crate::db::provider::{ConnectionProvider, ScopedConnection};
use crate::error::DbResult;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{debug, warn};

/// Identity of the execution context a scope belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextId {
    Task(tokio::task::Id),
    Thread(std::thread::ThreadId),
}

impl ContextId {
    /// The context of the caller: its tokio task, or its thread when not
    /// running inside a task.
    pub fn current() -> Self {
        match tokio::task::try_id() {
            Some(id) => Self::Task(id),
            None => Self::Thread(std::thread::current().id()),
        }
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(id) => write!(f, "task-{}", id),
            Self::Thread(id) => write!(f, "{:?}", id),
        }
    }
}

type SharedConnection<C> = Arc<AsyncMutex<C>>;

struct ContextEntry<C> {
    connection: SharedConnection<C>,
    depth: usize,
}

/// Counters describing the manager's connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextStats {
    /// Physical connections opened and cached
    pub opened: u64,
    /// Physical connections closed on a final exit
    pub closed: u64,
    /// Contexts currently holding a connection
    pub active_contexts: usize,
}

/// Per-context connection cache with reference-counted scopes.
pub struct ContextManager<P: ConnectionProvider> {
    provider: P,
    entries: Mutex<HashMap<ContextId, ContextEntry<P::Connection>>>,
    opened: AtomicU64,
    closed: AtomicU64,
}

impl<P: ConnectionProvider> fmt::Debug for ContextManager<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextManager")
            .field("target", &self.provider.target())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<P: ConnectionProvider> ContextManager<P> {
    pub fn new(provider: P) -> Arc<Self> {
        Arc::new(Self {
            provider,
            entries: Mutex::new(HashMap::new()),
            opened: AtomicU64::new(0),
            closed: AtomicU64::new(0),
        })
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<ContextId, ContextEntry<P::Connection>>> {
        // Entries are only mutated with simple map operations, so a poisoned
        // lock still holds consistent data.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enter a scope for the current execution context.
    ///
    /// Returns the context's cached connection, opening one through the
    /// provider if this is the outermost scope. A provider failure is
    /// returned as-is and leaves no bookkeeping behind.
    pub async fn enter(self: &Arc<Self>) -> DbResult<ScopeGuard<P>> {
        let context = ContextId::current();

        if let Some(connection) = self.reenter(context) {
            return Ok(ScopeGuard::new(Arc::clone(self), context, connection));
        }

        let fresh = self.provider.open().await?;

        // Re-check after the open: another scope of this context (a future
        // joined within the same task) may have committed first.
        let (connection, duplicate) = {
            let mut entries = self.lock_entries();
            match entries.get_mut(&context) {
                Some(entry) => {
                    entry.depth += 1;
                    (Arc::clone(&entry.connection), Some(fresh))
                }
                None => {
                    let connection = Arc::new(AsyncMutex::new(fresh));
                    entries.insert(
                        context,
                        ContextEntry {
                            connection: Arc::clone(&connection),
                            depth: 1,
                        },
                    );
                    self.opened.fetch_add(1, Ordering::AcqRel);
                    (connection, None)
                }
            }
        };

        if let Some(duplicate) = duplicate {
            duplicate.close().await;
        } else {
            debug!(
                context = %context,
                target = %self.provider.target().display(),
                "Opened connection for context"
            );
        }

        Ok(ScopeGuard::new(Arc::clone(self), context, connection))
    }

    fn reenter(&self, context: ContextId) -> Option<SharedConnection<P::Connection>> {
        let mut entries = self.lock_entries();
        let entry = entries.get_mut(&context)?;
        entry.depth += 1;
        debug!(context = %context, depth = entry.depth, "Reentered scope");
        Some(Arc::clone(&entry.connection))
    }

    /// Leave one scope; returns the connection when this was the final exit.
    fn exit(&self, context: ContextId) -> Option<SharedConnection<P::Connection>> {
        let mut entries = self.lock_entries();
        let Some(entry) = entries.get_mut(&context) else {
            warn!(context = %context, "Scope exit without a matching entry");
            return None;
        };

        entry.depth = entry.depth.saturating_sub(1);
        if entry.depth > 0 {
            debug!(context = %context, depth = entry.depth, "Left nested scope");
            return None;
        }

        let entry = entries.remove(&context)?;
        self.closed.fetch_add(1, Ordering::AcqRel);
        debug!(context = %context, "Closing connection for context");
        Some(entry.connection)
    }

    /// Nesting depth of the current context (0 when it holds no connection).
    pub fn depth(&self) -> usize {
        let context = ContextId::current();
        self.lock_entries()
            .get(&context)
            .map(|e| e.depth)
            .unwrap_or(0)
    }

    /// Whether the current context holds a connection.
    pub fn is_active(&self) -> bool {
        self.depth() > 0
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            opened: self.opened.load(Ordering::Acquire),
            closed: self.closed.load(Ordering::Acquire),
            active_contexts: self.lock_entries().len(),
        }
    }
}

/// One entered scope. Dropping or releasing it leaves the scope.
pub struct ScopeGuard<P: ConnectionProvider> {
    manager: Arc<ContextManager<P>>,
    context: ContextId,
    connection: Option<SharedConnection<P::Connection>>,
}

impl<P: ConnectionProvider> fmt::Debug for ScopeGuard<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("context", &self.context)
            .field("released", &self.connection.is_none())
            .finish_non_exhaustive()
    }
}

impl<P: ConnectionProvider> ScopeGuard<P> {
    fn new(
        manager: Arc<ContextManager<P>>,
        context: ContextId,
        connection: SharedConnection<P::Connection>,
    ) -> Self {
        Self {
            manager,
            context,
            connection: Some(connection),
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Lock the context's connection for statement execution.
    ///
    /// Queries issued in the same context lock this connection too, so the
    /// returned guard must be dropped before running one; holding it across
    /// a nested query deadlocks.
    pub async fn lock(&self) -> AsyncMutexGuard<'_, P::Connection> {
        match &self.connection {
            Some(connection) => connection.lock().await,
            // `connection` is only taken by `release` and `drop`, both consume the guard.
            None => unreachable!("scope used after release"),
        }
    }

    /// Commit any transaction left open on the context's connection.
    pub async fn commit(&self) -> DbResult<()> {
        self.lock().await.connection().commit().await
    }

    /// Leave the scope, closing the connection gracefully on the final exit.
    pub async fn release(mut self) {
        let own = self.connection.take();
        let Some(last) = self.manager.exit(self.context) else {
            return;
        };

        drop(own);
        match Arc::try_unwrap(last) {
            Ok(connection) => connection.into_inner().close().await,
            Err(_) => warn!(
                context = %self.context,
                "Connection still shared on final exit; closing on drop"
            ),
        }
    }
}

impl<P: ConnectionProvider> Drop for ScopeGuard<P> {
    fn drop(&mut self) {
        if self.connection.take().is_none() {
            return;
        }

        // The last Arc drops here, which closes the physical connection.
        if self.manager.exit(self.context).is_some() {
            warn!(
                context = %self.context,
                "Scope released via Drop - consider using explicit release()"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::provider::SqliteFileProvider;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> Arc<ContextManager<SqliteFileProvider>> {
        ContextManager::new(SqliteFileProvider::new(dir.path().join("ctx.db")))
    }

    #[tokio::test]
    async fn test_nested_scopes_share_one_connection() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let outer = manager.enter().await.unwrap();
        let inner = manager.enter().await.unwrap();
        let innermost = manager.enter().await.unwrap();
        assert_eq!(manager.depth(), 3);
        assert_eq!(manager.stats().opened, 1);

        innermost.release().await;
        inner.release().await;
        assert_eq!(manager.depth(), 1);
        assert_eq!(manager.stats().closed, 0);

        outer.release().await;
        let stats = manager.stats();
        assert_eq!(stats.opened, 1);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.active_contexts, 0);
        assert!(!manager.is_active());
    }

    #[tokio::test]
    async fn test_drop_releases_scope() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        {
            let _outer = manager.enter().await.unwrap();
            {
                let _inner = manager.enter().await.unwrap();
                assert_eq!(manager.depth(), 2);
            }
            assert_eq!(manager.depth(), 1);
        }

        assert_eq!(manager.depth(), 0);
        assert_eq!(manager.stats().closed, 1);
    }

    #[tokio::test]
    async fn test_reopen_after_final_exit() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        manager.enter().await.unwrap().release().await;
        manager.enter().await.unwrap().release().await;

        let stats = manager.stats();
        assert_eq!(stats.opened, 2);
        assert_eq!(stats.closed, 2);
    }

    #[tokio::test]
    async fn test_failed_open_leaves_no_entry() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be opened as a database file.
        let manager = ContextManager::new(SqliteFileProvider::new(dir.path()));

        assert!(manager.enter().await.is_err());
        assert_eq!(manager.depth(), 0);
        assert_eq!(manager.stats(), ContextStats::default());
    }

    #[tokio::test]
    async fn test_context_id_is_stable_within_task() {
        let handle = tokio::spawn(async {
            let first = ContextId::current();
            tokio::task::yield_now().await;
            (first, ContextId::current())
        });
        let (first, second) = handle.await.unwrap();
        assert_eq!(first, second);
        assert!(matches!(first, ContextId::Task(_)));
    }
}
