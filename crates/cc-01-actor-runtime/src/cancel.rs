//! # Cancellation
//!
//! Cooperative cancellation observed at suspension points. A source owns the
//! scope; tokens are cheap clones handed to children. Cancelling is
//! idempotent and propagates to child scopes.

use tokio_util::sync::CancellationToken as RawToken;

/// Owner of a cancellation scope.
#[derive(Debug)]
pub struct CancellationTokenSource {
    token: RawToken,
}

impl CancellationTokenSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: RawToken::new(),
        }
    }

    /// A token observing this scope.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            token: self.token.clone(),
        }
    }

    /// A child source: cancelled when this one is, cancellable on its own.
    #[must_use]
    pub fn child_source(&self) -> CancellationTokenSource {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Cancel the scope. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for CancellationTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer half of a cancellation scope.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    token: RawToken,
}

impl CancellationToken {
    /// A token that is never cancelled.
    #[must_use]
    pub fn never() -> Self {
        Self {
            token: RawToken::new(),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the scope is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Run `fut`; `None` means cancellation won the race at a suspension
    /// point.
    pub async fn run_until_cancelled<F: std::future::Future>(&self, fut: F) -> Option<F::Output> {
        self.token.run_until_cancelled(fut).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let source = CancellationTokenSource::new();
        source.cancel();
        source.cancel();
        assert!(source.is_cancelled());
        assert!(source.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_child_scope_propagation() {
        let parent = CancellationTokenSource::new();
        let child = parent.child_source();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent_running() {
        let parent = CancellationTokenSource::new();
        let child = parent.child_source();
        child.cancel();
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_until_cancelled_returns_none() {
        let source = CancellationTokenSource::new();
        let token = source.token();
        source.cancel();
        let out = token
            .run_until_cancelled(tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert!(out.is_none());
    }
}
