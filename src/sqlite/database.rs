//! Database handle.
//!
//! A [`Database`] owns one in-memory engine instance and the operation queue
//! that serializes every call against it. File-backed handles load their
//! snapshot when the engine is first created and write it back on close.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_rusqlite::Connection;

use super::engine::{self, Collect, RunResult};
use super::params::Params;
use super::pending::Pending;
use super::queue::OperationQueue;
use super::statement::Statement;
use super::types::Row;
use crate::config::{DatabaseConfig, Location, OpenFlags};
use crate::error::{DatabaseError, Result};
use crate::runtime::EngineRuntime;

/// Lifecycle of a database handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Uninitialized,
    Initializing,
    Ready,
    Closing,
    Closed,
}

enum EngineSlot {
    Empty,
    Open(Connection),
    Released,
}

pub(crate) struct Shared {
    config: DatabaseConfig,
    queue: OperationQueue,
    state: Mutex<HandleState>,
    engine: Mutex<EngineSlot>,
    changes: AtomicU64,
    last_id: AtomicI64,
}

impl Shared {
    pub(crate) fn is_closed(&self) -> bool {
        *self.state.lock() == HandleState::Closed
    }

    fn set_state(&self, state: HandleState) {
        let mut current = self.state.lock();
        if *current != state {
            tracing::debug!(location = %self.config.location, from = ?*current, to = ?state, "handle state");
            *current = state;
        }
    }

    /// Queue `f` behind everything already scheduled on this handle.
    pub(crate) fn schedule<F, Fut, T>(self: &Arc<Self>, label: &'static str, f: F) -> Pending<T>
    where
        F: FnOnce(Arc<Shared>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Pending::failed(DatabaseError::Closed);
        }
        let shared = Arc::clone(self);
        self.queue.enqueue(label, move || f(shared))
    }

    /// The engine instance, created on first use.
    ///
    /// Only called from queued tasks, so creation never races.
    pub(crate) async fn engine(&self) -> Result<Connection> {
        {
            let slot = self.engine.lock();
            match &*slot {
                EngineSlot::Open(conn) => return Ok(conn.clone()),
                EngineSlot::Released => return Err(DatabaseError::Closed),
                EngineSlot::Empty => {}
            }
        }

        self.set_state(HandleState::Initializing);
        match self.initialize().await {
            Ok(conn) => {
                *self.engine.lock() = EngineSlot::Open(conn.clone());
                self.set_state(HandleState::Ready);
                Ok(conn)
            }
            Err(e) => {
                self.set_state(HandleState::Uninitialized);
                Err(e)
            }
        }
    }

    async fn initialize(&self) -> Result<Connection> {
        let runtime = EngineRuntime::get()?;

        let snapshot = match &self.config.location {
            Location::Volatile => None,
            Location::File(path) => {
                if tokio::fs::try_exists(path).await? {
                    Some(path.clone())
                } else if self.config.is_read_only() {
                    return Err(DatabaseError::NotFoundReadOnly(path.clone()));
                } else if !self.config.may_create() {
                    return Err(DatabaseError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("database not found: {}", path.display()),
                    )));
                } else {
                    None
                }
            }
        };

        let conn = runtime
            .open_engine(self.config.statement_cache_capacity)
            .await?;

        let read_only = self.config.is_read_only();
        let loaded = snapshot.is_some();
        conn.call(move |c| {
            if let Some(path) = snapshot {
                engine::load_snapshot(c, &path)?;
            }
            if read_only {
                engine::set_query_only(c)?;
            }
            Ok(())
        })
        .await?;

        tracing::debug!(location = %self.config.location, loaded, read_only, "engine initialized");
        Ok(conn)
    }

    pub(crate) fn record(&self, run: RunResult) {
        self.changes.store(run.changes, Ordering::Release);
        self.last_id.store(run.last_id, Ordering::Release);
    }

    async fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.set_state(HandleState::Closing);

        let slot = std::mem::replace(&mut *self.engine.lock(), EngineSlot::Released);
        let conn = match slot {
            EngineSlot::Open(conn) => conn,
            EngineSlot::Empty | EngineSlot::Released => {
                self.set_state(HandleState::Closed);
                return Ok(());
            }
        };

        if let (Some(path), false) = (self.config.location.path(), self.config.is_read_only()) {
            if let Err(e) = persist(&conn, path).await {
                // Keep the engine so the caller can retry the close
                *self.engine.lock() = EngineSlot::Open(conn);
                self.set_state(HandleState::Ready);
                return Err(e);
            }
        }

        if let Err(e) = conn.close().await {
            tracing::warn!(location = %self.config.location, error = %e, "engine did not close cleanly");
        }
        self.set_state(HandleState::Closed);
        Ok(())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let unsaved = matches!(*self.engine.get_mut(), EngineSlot::Open(_))
            && !self.config.location.is_volatile()
            && !self.config.is_read_only();
        if unsaved {
            tracing::warn!(location = %self.config.location, "database dropped without close; changes not persisted");
        }
    }
}

/// Write a snapshot next to `path`, then move it into place.
async fn persist(conn: &Connection, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path(path);
    let target = tmp.clone();
    let stored = conn
        .call(move |c| Ok(engine::store_snapshot(c, &target)?))
        .await;
    if let Err(e) = stored {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    tokio::fs::rename(&tmp, path).await?;
    tracing::debug!(path = %path.display(), "snapshot written");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    path.with_file_name(format!("{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

/// An open logical database.
///
/// Every method queues a task and returns immediately; tasks run strictly in
/// the order they were issued, whether or not earlier ones were awaited.
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl Database {
    /// Create a handle and queue its initialization.
    ///
    /// Must be called from within a tokio runtime. Calls issued before
    /// initialization finishes simply wait their turn.
    pub fn new(config: DatabaseConfig) -> Result<Self> {
        let queue = OperationQueue::new(config.queue_warn_depth)?;
        let shared = Arc::new(Shared {
            config,
            queue,
            state: Mutex::new(HandleState::Uninitialized),
            engine: Mutex::new(EngineSlot::Empty),
            changes: AtomicU64::new(0),
            last_id: AtomicI64::new(0),
        });

        // Outcome is logged by the queue and reported again by the next call
        let _ = shared.schedule("open", |s| async move { s.engine().await.map(|_| ()) });

        Ok(Self { shared })
    }

    /// Open a database and wait until it is usable.
    pub async fn open(location: impl Into<Location>, flags: OpenFlags) -> Result<Self> {
        Self::connect(DatabaseConfig::new(location).flags(flags)).await
    }

    /// Open a database from a full configuration and wait until it is usable.
    #[tracing::instrument(level = "debug", skip(config), fields(location = %config.location))]
    pub async fn connect(config: DatabaseConfig) -> Result<Self> {
        let db = Self::new(config)?;
        db.ready().await?;
        Ok(db)
    }

    /// Resolves once the engine exists (or failed to initialize).
    pub fn ready(&self) -> Pending<()> {
        self.shared
            .schedule("ready", |s| async move { s.engine().await.map(|_| ()) })
    }

    /// Execute `sql` once, recording the affected-row count and last rowid.
    pub fn run(&self, sql: impl Into<String>, params: impl Into<Params>) -> Pending<RunResult> {
        let sql = sql.into();
        let binding = match params.into().into_binding() {
            Ok(b) => b,
            Err(e) => return Pending::failed(e),
        };
        self.shared.schedule("run", move |s| async move {
            let conn = s.engine().await?;
            let outcome = conn
                .call(move |c| Ok(engine::execute(c, &sql, binding.as_ref(), Collect::Nothing)?))
                .await?;
            s.record(outcome.run);
            Ok(outcome.run)
        })
    }

    /// Execute `sql` and collect every row.
    pub fn all(&self, sql: impl Into<String>, params: impl Into<Params>) -> Pending<Vec<Row>> {
        let sql = sql.into();
        let binding = match params.into().into_binding() {
            Ok(b) => b,
            Err(e) => return Pending::failed(e),
        };
        self.shared.schedule("all", move |s| async move {
            let conn = s.engine().await?;
            let outcome = conn
                .call(move |c| Ok(engine::execute(c, &sql, binding.as_ref(), Collect::All)?))
                .await?;
            Ok(outcome.rows)
        })
    }

    /// Execute `sql` and return the first row, if any.
    pub fn get(&self, sql: impl Into<String>, params: impl Into<Params>) -> Pending<Option<Row>> {
        let sql = sql.into();
        let binding = match params.into().into_binding() {
            Ok(b) => b,
            Err(e) => return Pending::failed(e),
        };
        self.shared.schedule("get", move |s| async move {
            let conn = s.engine().await?;
            let outcome = conn
                .call(move |c| Ok(engine::execute(c, &sql, binding.as_ref(), Collect::First)?))
                .await?;
            Ok(outcome.rows.into_iter().next())
        })
    }

    /// Execute one or more semicolon-separated statements (schema, DDL).
    pub fn exec(&self, sql: impl Into<String>) -> Pending<()> {
        let sql = sql.into();
        self.shared.schedule("exec", move |s| async move {
            let conn = s.engine().await?;
            conn.call(move |c| Ok(engine::execute_batch(c, &sql)?)).await?;
            Ok(())
        })
    }

    /// Prepare a statement. The handle is returned at once; preparation is queued.
    pub fn prepare(&self, sql: impl Into<String>, params: impl Into<Params>) -> Statement {
        Statement::prepare(&self.shared, sql.into(), params.into())
    }

    /// Persist (file-backed, writable handles) and release the engine.
    ///
    /// Closing a closed handle succeeds without doing anything.
    #[tracing::instrument(level = "debug", skip(self), fields(location = %self.shared.config.location))]
    pub fn close(&self) -> Pending<()> {
        if self.shared.is_closed() {
            return Pending::ready(Ok(()));
        }
        let shared = Arc::clone(&self.shared);
        self.shared
            .queue
            .enqueue("close", move || async move { shared.close().await })
    }

    /// Run `callback` once the queue reaches this point.
    pub fn serialize<F>(&self, callback: F) -> Pending<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.checkpoint("serialize", callback)
    }

    /// Same as [`serialize`](Self::serialize); the queue already orders everything.
    pub fn parallelize<F>(&self, callback: F) -> Pending<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.checkpoint("parallelize", callback)
    }

    fn checkpoint<F>(&self, label: &'static str, callback: F) -> Pending<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.schedule(label, move |_| async move {
            callback();
            Ok(())
        })
    }

    pub fn state(&self) -> HandleState {
        *self.shared.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn location(&self) -> &Location {
        &self.shared.config.location
    }

    /// Rows changed by the last completed `run`.
    pub fn changes(&self) -> u64 {
        self.shared.changes.load(Ordering::Acquire)
    }

    /// Rowid generated by the last completed `run`.
    pub fn last_id(&self) -> i64 {
        self.shared.last_id.load(Ordering::Acquire)
    }

    /// Tasks queued on this handle and not yet finished.
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.depth()
    }
}
