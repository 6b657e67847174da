//! # Timers
//!
//! Absolute-deadline sleeping and deadline races. Timeouts are races: on
//! expiry the operation observes cancellation at its next suspension point
//! and the caller gets [`Elapsed`].

use std::future::Future;
use thiserror::Error;

pub use tokio::time::Instant;

/// The deadline won the race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline elapsed")]
pub struct Elapsed;

/// Sleep until an absolute deadline.
pub async fn sleep_until(deadline: Instant) {
    tokio::time::sleep_until(deadline).await;
}

/// Race `fut` against an absolute deadline.
pub async fn with_deadline<F: Future>(deadline: Instant, fut: F) -> Result<F::Output, Elapsed> {
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| Elapsed)
}

/// A periodic tick starting at `start`, skipping missed ticks instead of
/// bursting.
#[must_use]
pub fn interval_at(start: Instant, period: std::time::Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval
}
