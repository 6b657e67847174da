//! # SharedFuture
//!
//! One computation, many waiters. Handles are cheap clones; when the last
//! one drops before completion, the backing task is aborted and late waiters
//! observe [`TaskError::Cancelled`].
//!
//! SharedFuture is actor-confined: safe within a single actor, but designed
//! for same-task waiters sharing a memoized result, not as a general
//! synchronization primitive.

use crate::task::TaskError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::AbortHandle;

#[derive(Debug)]
struct Inner<T> {
    rx: watch::Receiver<Option<Result<T, TaskError>>>,
    abort: AbortHandle,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        // Last handle gone: nobody can observe the result any more.
        self.abort.abort();
    }
}

/// A cloneable handle to a shared computation.
#[derive(Debug)]
pub struct SharedFuture<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SharedFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SharedFuture<T> {
    /// Start `fut` on the scheduler and share its eventual value.
    #[must_use]
    pub fn spawn(fut: impl Future<Output = T> + Send + 'static) -> Self {
        let (tx, rx) = watch::channel(None);
        let handle = tokio::spawn(async move {
            let value = fut.await;
            let _ = tx.send(Some(Ok(value)));
        });
        Self {
            inner: Arc::new(Inner {
                rx,
                abort: handle.abort_handle(),
            }),
        }
    }

    /// Wrap an already-known value.
    #[must_use]
    pub fn ready(value: T) -> Self {
        let (tx, rx) = watch::channel(Some(Ok(value)));
        let handle = tokio::spawn(async move {
            // Keep the sender alive for as long as anyone may wait.
            tx.closed().await;
        });
        Self {
            inner: Arc::new(Inner {
                rx,
                abort: handle.abort_handle(),
            }),
        }
    }

    /// Await the shared value. Every waiter gets a clone.
    pub async fn get(&self) -> Result<T, TaskError> {
        let mut rx = self.inner.rx.clone();
        let result = rx.wait_for(|slot| slot.is_some()).await;
        match result {
            Ok(slot) => slot.clone().unwrap_or(Err(TaskError::Cancelled)),
            // Sender dropped without a value: the backing task was aborted.
            Err(_) => Err(TaskError::Cancelled),
        }
    }

    /// The value, if already computed.
    #[must_use]
    pub fn peek(&self) -> Option<Result<T, TaskError>> {
        self.inner.rx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_many_waiters_one_computation() {
        static RUNS: AtomicU32 = AtomicU32::new(0);
        let shared = SharedFuture::spawn(async {
            RUNS.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            7u32
        });

        let a = shared.clone();
        let b = shared.clone();
        let (ra, rb) = tokio::join!(a.get(), b.get());
        assert_eq!(ra.unwrap(), 7);
        assert_eq!(rb.unwrap(), 7);
        assert_eq!(RUNS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ready_value() {
        let shared = SharedFuture::ready(3u32);
        assert_eq!(shared.get().await.unwrap(), 3);
        assert_eq!(shared.peek(), Some(Ok(3)));
    }

    #[tokio::test]
    async fn test_last_drop_aborts_backing_task() {
        static RAN_TO_END: AtomicU32 = AtomicU32::new(0);
        let shared = SharedFuture::spawn(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            RAN_TO_END.fetch_add(1, Ordering::SeqCst);
            1u32
        });
        drop(shared);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(RAN_TO_END.load(Ordering::SeqCst), 0);
    }
}
