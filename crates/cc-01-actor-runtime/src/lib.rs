//! # Actor Runtime
//!
//! Structured concurrency for the consensus stack, on top of the tokio
//! multi-threaded work-stealing scheduler:
//!
//! - [`Actor`]/[`ActorRef`]: single-threaded units of locality. At most one
//!   message of an actor is in flight; messages from one sender arrive in
//!   send order.
//! - [`Task`]/[`StartedTask`]: lazy and running futures with abort-on-drop
//!   ownership, plus [`ask`](ActorRef::ask) and a [`Promise`] bridge between
//!   callback-style and future-style APIs.
//! - [`CancellationTokenSource`]: idempotent, scope-propagating cancellation
//!   observed at suspension points.
//! - Timers: [`sleep_until`], [`with_deadline`] deadline racing.
//! - [`SharedFuture`]: one computation, many same-actor waiters; the backing
//!   task is aborted when the last handle drops.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod actor;
pub mod cancel;
pub mod shared_future;
pub mod task;
pub mod timer;

pub use actor::{spawn_actor, Actor, ActorRef, SendError};
pub use cancel::{CancellationToken, CancellationTokenSource};
pub use shared_future::SharedFuture;
pub use task::{all, make_bridge, BridgeTask, Promise, StartedTask, Task, TaskError};
pub use timer::{interval_at, sleep_until, with_deadline, Elapsed, Instant};
