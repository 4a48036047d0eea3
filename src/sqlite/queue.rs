//! Per-handle FIFO operation queue.
//!
//! Every task issued against one database handle goes through a single
//! drain loop, so tasks run one at a time in exactly the order they were
//! enqueued. A failed (or panicked) task only affects the caller awaiting it;
//! the loop moves on to the next task either way.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::pending::Pending;
use crate::error::{DatabaseError, Result};

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Job {
    seq: u64,
    label: &'static str,
    task: BoxedTask,
}

struct QueueStats {
    next_seq: AtomicU64,
    depth: AtomicUsize,
    warn_depth: usize,
    crossings: AtomicU64,
}

/// FIFO scheduler owning all access to one engine instance.
pub struct OperationQueue {
    tx: mpsc::UnboundedSender<Job>,
    stats: Arc<QueueStats>,
}

impl OperationQueue {
    /// Start the drain loop on the current tokio runtime.
    pub fn new(warn_depth: usize) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| DatabaseError::Runtime(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(QueueStats {
            next_seq: AtomicU64::new(0),
            depth: AtomicUsize::new(0),
            warn_depth: warn_depth.max(1),
            crossings: AtomicU64::new(0),
        });
        handle.spawn(drain(rx, Arc::clone(&stats)));

        Ok(Self { tx, stats })
    }

    /// Schedule `task` after everything enqueued so far.
    ///
    /// The task is queued before this returns; the returned [`Pending`] only
    /// observes it.
    pub fn enqueue<F, Fut, T>(&self, label: &'static str, task: F) -> Pending<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let seq = self.stats.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let stats = Arc::clone(&self.stats);
        let task: BoxedTask = Box::pin(async move {
            let outcome = task().await;
            if let Err(e) = &outcome {
                tracing::warn!(seq, task = label, error = %e, "queued task failed");
            }
            // Finished before the caller hears about it
            stats.depth.fetch_sub(1, Ordering::AcqRel);
            // Receiver may be gone; the task still counted as run
            let _ = tx.send(outcome);
        });

        let depth = self.stats.depth.fetch_add(1, Ordering::AcqRel) + 1;
        if depth == self.stats.warn_depth {
            self.stats.crossings.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(depth, "operation queue is backing up");
        }

        if self.tx.send(Job { seq, label, task }).is_err() {
            self.stats.depth.fetch_sub(1, Ordering::AcqRel);
            return Pending::failed(DatabaseError::Queue(
                "operation queue stopped".to_string(),
            ));
        }
        Pending::waiting(rx, label)
    }

    /// Tasks enqueued but not yet finished.
    pub fn depth(&self) -> usize {
        self.stats.depth.load(Ordering::Acquire)
    }

    /// How many times the depth has climbed to the warning threshold.
    pub fn backlog_warnings(&self) -> u64 {
        self.stats.crossings.load(Ordering::Relaxed)
    }
}

async fn drain(mut rx: mpsc::UnboundedReceiver<Job>, stats: Arc<QueueStats>) {
    while let Some(Job { seq, label, task }) = rx.recv().await {
        // Own tokio task so a panic stays contained
        if let Err(e) = tokio::spawn(task).await {
            tracing::error!(seq, task = label, error = %e, "queued task panicked");
            // A panicked task never reached its own decrement
            stats.depth.fetch_sub(1, Ordering::AcqRel);
        }
    }
    tracing::debug!("operation queue drained");
}
