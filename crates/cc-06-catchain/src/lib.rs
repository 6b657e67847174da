//! # Catchain - Causally-Ordered Block Dissemination
//!
//! The receiver admits blocks from an authenticated overlay into a
//! content-addressed DAG and hands them upward in causal order: a block is
//! delivered only after every transitive ancestor. Misbehaving sources
//! (forks, inconsistent dependencies) are proven, blamed, and excluded.
//!
//! Layering:
//!
//! - [`wire`]: bincode wire model, content addressing, structural
//!   pre-validation.
//! - [`source`]: per-validator bookkeeping (heights, forks, blame).
//! - [`dag`]: the pure DAG state machine; IO-free, emits effect events.
//! - [`receiver`]: the actor tying the DAG to the overlay, the journal, and
//!   the consensus layer.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod dag;
pub mod receiver;
pub mod source;
pub mod wire;

pub use cc_03_overlay_sender::{OverlaySender, SenderError};
pub use dag::{BlockDag, BlockState, DagEvent};
pub use receiver::{CatchainNode, CatchainOptions, Receiver, ReceiverEvent, ReceiverMessage};
pub use source::SourceState;
pub use wire::{
    block_db_key, BlockPayload, CatchainAnswer, CatchainQuery, OverlayMessage, WireBlock,
    WireBlockData, WireBlockDep,
};
