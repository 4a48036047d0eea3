//! Prepared statement handles.
//!
//! [`Statement`] is handed back before the engine has parsed the query. It is
//! an explicit two-phase handle: a phase flag that starts out pending, plus a
//! watch channel every method awaits before touching the engine. All methods
//! are queued on the owning database, so they still run after preparation
//! and in issuance order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::database::Shared;
use super::engine::{self, Collect, RunResult};
use super::params::{Binding, Params};
use super::pending::Pending;
use super::types::{Columns, Row};
use crate::error::{DatabaseError, Result};

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Pending,
    Ready,
    Failed(String),
    Finalized,
    /// The owning database closed before preparation.
    Closed,
}

struct StatementInner {
    sql: String,
    phase: watch::Sender<Phase>,
    binding: Mutex<Option<Binding>>,
    columns: Mutex<Option<Columns>>,
}

impl StatementInner {
    fn phase(&self) -> Phase {
        self.phase.borrow().clone()
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.send_replace(phase);
    }

    /// Wait for preparation to settle.
    async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.phase.subscribe();
        let phase = rx
            .wait_for(|p| *p != Phase::Pending)
            .await
            .map_err(|_| DatabaseError::Queue("statement state lost".to_string()))?
            .clone();
        match phase {
            Phase::Ready => Ok(()),
            Phase::Failed(msg) => Err(DatabaseError::Prepare(msg)),
            Phase::Finalized => Err(DatabaseError::Finalized),
            Phase::Closed => Err(DatabaseError::Closed),
            Phase::Pending => Err(DatabaseError::Queue("statement not prepared".to_string())),
        }
    }

    /// Replace the stored binding if new parameters were given.
    fn rebind(&self, binding: Option<Binding>) -> Option<Binding> {
        let mut current = self.binding.lock();
        if binding.is_some() {
            *current = binding;
        }
        current.clone()
    }
}

/// Settles a still-pending phase when the prepare task ends without doing so.
struct SettleGuard(Arc<StatementInner>);

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if self.0.phase() == Phase::Pending {
            self.0
                .set_phase(Phase::Failed("preparation did not complete".to_string()));
        }
    }
}

/// A prepared statement bound to one database handle.
#[derive(Clone)]
pub struct Statement {
    db: Arc<Shared>,
    inner: Arc<StatementInner>,
}

impl Statement {
    pub(crate) fn prepare(db: &Arc<Shared>, sql: String, params: Params) -> Self {
        let (phase, _) = watch::channel(Phase::Pending);
        let inner = Arc::new(StatementInner {
            sql,
            phase,
            binding: Mutex::new(None),
            columns: Mutex::new(None),
        });
        let stmt = Self {
            db: Arc::clone(db),
            inner: Arc::clone(&inner),
        };

        let binding = match params.into_binding() {
            Ok(b) => b,
            Err(e) => {
                inner.set_phase(Phase::Failed(e.to_string()));
                return stmt;
            }
        };
        *inner.binding.lock() = binding;

        if db.is_closed() {
            inner.set_phase(Phase::Closed);
            return stmt;
        }

        let _ = db.schedule("prepare", move |s| async move {
            let _settle = SettleGuard(Arc::clone(&inner));
            let outcome = async {
                let conn = s.engine().await?;
                let sql = inner.sql.clone();
                Ok::<_, DatabaseError>(conn.call(move |c| Ok(engine::columns(c, &sql)?)).await?)
            }
            .await;

            match outcome {
                Ok(columns) => {
                    *inner.columns.lock() = Some(columns);
                    inner.set_phase(Phase::Ready);
                    Ok(())
                }
                Err(DatabaseError::Closed) => {
                    inner.set_phase(Phase::Closed);
                    Err(DatabaseError::Closed)
                }
                Err(e) => {
                    inner.set_phase(Phase::Failed(e.to_string()));
                    Err(e)
                }
            }
        });

        stmt
    }

    pub fn sql(&self) -> &str {
        &self.inner.sql
    }

    /// Result column names, once preparation has finished.
    pub fn columns(&self) -> Option<Columns> {
        self.inner.columns.lock().clone()
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.phase() == Phase::Finalized
    }

    /// Wait until preparation has finished.
    pub async fn ready(&self) -> Result<()> {
        self.inner.wait_ready().await
    }

    /// Queue a task that runs only after preparation succeeded.
    fn schedule<F, T>(&self, label: &'static str, params: Params, f: F) -> Pending<T>
    where
        F: FnOnce(tokio_rusqlite::Connection, String, Option<Binding>) -> BoxFuture<T>
            + Send
            + 'static,
        T: Send + 'static,
    {
        if self.db.is_closed() {
            return Pending::failed(DatabaseError::Closed);
        }
        if self.is_finalized() {
            return Pending::failed(DatabaseError::Finalized);
        }
        let binding = match params.into_binding() {
            Ok(b) => b,
            Err(e) => return Pending::failed(e),
        };

        let inner = Arc::clone(&self.inner);
        self.db.schedule(label, move |s| async move {
            inner.wait_ready().await?;
            let conn = s.engine().await?;
            let binding = inner.rebind(binding);
            f(conn, inner.sql.clone(), binding).await
        })
    }

    /// Bind (if given) and execute once without collecting rows.
    pub fn run(&self, params: impl Into<Params>) -> Pending<RunResult> {
        let db = Arc::clone(&self.db);
        self.schedule("statement.run", params.into(), move |conn, sql, binding| {
            Box::pin(async move {
                let outcome = conn
                    .call(move |c| Ok(engine::execute(c, &sql, binding.as_ref(), Collect::Nothing)?))
                    .await?;
                db.record(outcome.run);
                Ok(outcome.run)
            })
        })
    }

    /// Bind (if given) and collect every row. The binding is kept for reuse.
    pub fn all(&self, params: impl Into<Params>) -> Pending<Vec<Row>> {
        self.schedule("statement.all", params.into(), |conn, sql, binding| {
            Box::pin(async move {
                let outcome = conn
                    .call(move |c| Ok(engine::execute(c, &sql, binding.as_ref(), Collect::All)?))
                    .await?;
                Ok(outcome.rows)
            })
        })
    }

    /// Bind (if given) and return the first row, if any.
    pub fn get(&self, params: impl Into<Params>) -> Pending<Option<Row>> {
        self.schedule("statement.get", params.into(), |conn, sql, binding| {
            Box::pin(async move {
                let outcome = conn
                    .call(move |c| Ok(engine::execute(c, &sql, binding.as_ref(), Collect::First)?))
                    .await?;
                Ok(outcome.rows.into_iter().next())
            })
        })
    }

    /// Replace the binding without executing. `()` clears it.
    pub fn bind(&self, params: impl Into<Params>) -> Pending<()> {
        let params = params.into();
        let clear = params.is_none();
        let inner = Arc::clone(&self.inner);
        self.schedule("statement.bind", params, move |_, _, _| {
            Box::pin(async move {
                if clear {
                    *inner.binding.lock() = None;
                }
                Ok(())
            })
        })
    }

    /// Return the cursor to its starting position. The binding is kept.
    ///
    /// Every execution already ends with the cursor reset, so this only
    /// orders itself behind earlier calls.
    pub fn reset(&self) -> Pending<()> {
        self.schedule("statement.reset", Params::None, |_, _, _| {
            Box::pin(async move { Ok(()) })
        })
    }

    /// Release the engine-side statement. Later calls fail; finalizing twice is fine.
    ///
    /// Only this statement's cached entry is evicted; other cached statements
    /// on the handle stay prepared.
    pub fn finalize(&self) -> Pending<()> {
        if self.db.is_closed() {
            return Pending::failed(DatabaseError::Closed);
        }
        if self.is_finalized() {
            return Pending::ready(Ok(()));
        }
        let inner = Arc::clone(&self.inner);
        self.db.schedule("statement.finalize", move |s| async move {
            if inner.phase() == Phase::Finalized {
                return Ok(());
            }
            let prepared = inner.phase() == Phase::Ready;
            inner.set_phase(Phase::Finalized);
            *inner.binding.lock() = None;
            if prepared {
                let conn = s.engine().await?;
                let sql = inner.sql.clone();
                conn.call(move |c| Ok(engine::evict(c, &sql)?)).await?;
            }
            Ok(())
        })
    }
}
