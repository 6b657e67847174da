//! # Shared Bus - Event Bus for a Consensus Instance
//!
//! Typed in-process pub/sub between the actors of a single consensus run.
//!
//! Two delivery shapes:
//!
//! - **Broadcast events** ([`ConsensusEvent`]): fan-out to every subscriber,
//!   per-subscriber FIFO, no cross-subscriber ordering guarantee.
//! - **Request/response** ([`RequestChannel`]): `ResolveCandidate`,
//!   `ResolveState`, and `FinalizeBlock` each have exactly one handler;
//!   a second registration and a call with no handler are both errors.
//!
//! All cross-actor communication inside a consensus instance goes through
//! this bus; actors share no mutable state.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod events;
pub mod publisher;
pub mod requests;
pub mod subscriber;

// Re-export main types
pub use events::{ConsensusEvent, EventFilter, EventTopic, LeaderWindowStarted, StartEvent};
pub use publisher::EventBus;
pub use requests::{
    BusError, FinalizeBlockRequest, RequestChannel, RequestEnvelope, ResolvedCandidate,
    ResolvedState,
};
pub use subscriber::Subscription;

/// Maximum events buffered per subscriber before the slowest one lags.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
