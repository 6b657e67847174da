//! # Tasks
//!
//! [`Task`] is a lazy unit of work; starting it yields a [`StartedTask`]
//! that is awaitable exactly once and aborts on drop unless detached.
//! [`make_bridge`] converts between promise-style (`set_value`/`set_error`)
//! and future-style APIs.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Why an awaited task produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task was aborted or its scope cancelled.
    #[error("task cancelled")]
    Cancelled,
    /// The task panicked.
    #[error("task panicked")]
    Panicked,
}

/// A lazy task: nothing runs until [`start`](Task::start) or
/// [`detach`](Task::detach).
pub struct Task<T> {
    fut: BoxFuture<'static, T>,
}

impl<T: Send + 'static> Task<T> {
    pub fn new(fut: impl Future<Output = T> + Send + 'static) -> Self {
        Self { fut: fut.boxed() }
    }

    /// Schedule onto the scheduler and return the running handle.
    #[must_use]
    pub fn start(self) -> StartedTask<T> {
        StartedTask {
            handle: tokio::spawn(self.fut),
            abort_on_drop: true,
        }
    }

    /// Schedule and relinquish ownership: the task runs to completion on its
    /// own.
    pub fn detach(self) {
        self.start().detach();
    }

    /// Run inline on the current scheduler context.
    pub async fn run(self) -> T {
        self.fut.await
    }
}

/// An always-running task, awaitable exactly once.
///
/// Dropping an undetached handle aborts the work; the awaiter then observes
/// [`TaskError::Cancelled`].
#[derive(Debug)]
pub struct StartedTask<T> {
    handle: JoinHandle<T>,
    abort_on_drop: bool,
}

impl<T> StartedTask<T> {
    /// Let the task keep running without an owner.
    pub fn detach(mut self) {
        self.abort_on_drop = false;
    }

    /// Stop the task at its next suspension point.
    pub fn abort(&self) {
        self.handle.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for StartedTask<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(value)) => {
                self.abort_on_drop = false;
                Poll::Ready(Ok(value))
            }
            Poll::Ready(Err(join_error)) => {
                self.abort_on_drop = false;
                if join_error.is_cancelled() {
                    Poll::Ready(Err(TaskError::Cancelled))
                } else {
                    Poll::Ready(Err(TaskError::Panicked))
                }
            }
        }
    }
}

impl<T> Drop for StartedTask<T> {
    fn drop(&mut self) {
        if self.abort_on_drop {
            self.handle.abort();
        }
    }
}

/// Await a batch of started tasks, preserving order.
pub async fn all<T>(tasks: Vec<StartedTask<T>>) -> Result<Vec<T>, TaskError> {
    let mut out = Vec::with_capacity(tasks.len());
    for task in tasks {
        out.push(task.await?);
    }
    Ok(out)
}

/// The callback half of a bridge: fulfil it to resume the awaiting side.
#[derive(Debug)]
pub struct Promise<T> {
    tx: oneshot::Sender<T>,
}

impl<T: Send + 'static> Promise<T> {
    /// Fulfil the promise. A dropped awaiter is not an error.
    pub fn set_value(self, value: T) {
        let _ = self.tx.send(value);
    }
}

/// The awaitable half of a bridge. Resolves to [`TaskError::Cancelled`] when
/// the promise is dropped unfulfilled.
#[derive(Debug)]
pub struct BridgeTask<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for BridgeTask<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(value)) => Poll::Ready(Ok(value)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TaskError::Cancelled)),
        }
    }
}

/// Build a promise/awaiter pair bridging callback-style APIs into tasks.
#[must_use]
pub fn make_bridge<T: Send + 'static>() -> (BridgeTask<T>, Promise<T>) {
    let (tx, rx) = oneshot::channel();
    (BridgeTask { rx }, Promise { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_task_is_lazy_until_started() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let task = Task::new(async move {
            flag.store(true, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!ran.load(Ordering::SeqCst));

        task.start().await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_drop_aborts_undetached_task() {
        let (bridge, _promise_kept) = make_bridge::<()>();
        let started = Task::new(async move {
            let _ = bridge.await;
            42u32
        })
        .start();
        drop(started);
        // Nothing to assert beyond "no hang"; the drop aborted the task.
    }

    #[tokio::test]
    async fn test_abort_observed_as_cancelled() {
        let task = Task::new(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
        .start();
        task.abort();
        assert_eq!(task.await.unwrap_err(), TaskError::Cancelled);
    }

    #[tokio::test]
    async fn test_bridge_roundtrip() {
        let (bridge, promise) = make_bridge::<u32>();
        promise.set_value(7);
        assert_eq!(bridge.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_dropped_promise_cancels_bridge() {
        let (bridge, promise) = make_bridge::<u32>();
        drop(promise);
        assert_eq!(bridge.await.unwrap_err(), TaskError::Cancelled);
    }

    #[tokio::test]
    async fn test_all_preserves_order() {
        let tasks: Vec<_> = (0..4u32)
            .map(|i| {
                Task::new(async move {
                    tokio::time::sleep(Duration::from_millis(10 * (4 - i) as u64)).await;
                    i
                })
                .start()
            })
            .collect();
        assert_eq!(all(tasks).await.unwrap(), vec![0, 1, 2, 3]);
    }
}
