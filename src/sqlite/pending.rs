//! The future returned by every queued operation.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{DatabaseError, Result};

enum Inner<T> {
    Done(Option<Result<T>>),
    Waiting {
        rx: oneshot::Receiver<Result<T>>,
        label: &'static str,
    },
}

/// Outcome of a queued task.
///
/// The task is already scheduled when this is created; dropping it does not
/// cancel the task, only discards the outcome.
#[must_use = "the task runs anyway; await this to observe its outcome"]
pub struct Pending<T> {
    inner: Inner<T>,
}

// The outcome is only ever moved out, never pinned in place.
impl<T> Unpin for Pending<T> {}

impl<T> Pending<T> {
    pub(crate) fn waiting(rx: oneshot::Receiver<Result<T>>, label: &'static str) -> Self {
        Self {
            inner: Inner::Waiting { rx, label },
        }
    }

    /// An outcome that is known before anything is queued.
    pub(crate) fn ready(outcome: Result<T>) -> Self {
        Self {
            inner: Inner::Done(Some(outcome)),
        }
    }

    pub(crate) fn failed(err: DatabaseError) -> Self {
        Self::ready(Err(err))
    }
}

impl<T: Send + 'static> Pending<T> {
    /// Invoke a completion callback with the outcome, and still yield it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_complete<F>(self, callback: F) -> Pending<T>
    where
        F: FnOnce(std::result::Result<&T, &DatabaseError>) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = self.await;
            callback(outcome.as_ref());
            let _ = tx.send(outcome);
        });
        Pending::waiting(rx, "callback")
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.inner {
            Inner::Done(outcome) => match outcome.take() {
                Some(outcome) => Poll::Ready(outcome),
                None => Poll::Ready(Err(DatabaseError::Queue(
                    "outcome already taken".to_string(),
                ))),
            },
            Inner::Waiting { rx, label } => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
                // Sender dropped without an outcome: the task panicked
                Poll::Ready(Err(_)) => Poll::Ready(Err(DatabaseError::TaskPanicked(label))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_ready_outcome() {
        assert_eq!(Pending::ready(Ok(5)).await.unwrap(), 5);
        assert!(Pending::<()>::failed(DatabaseError::Closed).await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_dropped_sender_reports_panic() {
        let (tx, rx) = oneshot::channel::<Result<()>>();
        drop(tx);
        let err = Pending::waiting(rx, "boom").await.unwrap_err();
        assert!(matches!(err, DatabaseError::TaskPanicked("boom")));
    }

    #[tokio::test]
    async fn test_on_complete_sees_outcome() {
        let called = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&called);
        let value = Pending::ready(Ok(9))
            .on_complete(move |outcome| {
                assert_eq!(outcome.ok(), Some(&9));
                seen.store(true, Ordering::SeqCst);
            })
            .await
            .unwrap();
        assert_eq!(value, 9);
        assert!(called.load(Ordering::SeqCst));
    }
}
