//! # Shared Types - Domain Entities for Causal-Chain
//!
//! Single source of truth for the type definitions shared across subsystems:
//!
//! - Identities and addresses: [`NodeShortId`], [`PeerShortId`], [`PeerAddress`]
//! - Session and chain primitives: [`SessionId`], [`Height`], [`Slot`], [`ShardId`]
//! - The consensus candidate model: [`CandidateId`], [`RawCandidate`],
//!   [`NotarCert`], [`FinalCert`]
//! - The sliding-window [`RateLimiter`] used by query handlers
//!
//! Every type here is `serde`-serializable; wire and journal encodings use
//! `bincode` on top of these derives.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod consensus;
pub mod entities;
pub mod errors;
pub mod rate_limiter;

// Re-export main types
pub use consensus::{
    BlockCandidate, BlockData, BlockId, CandidateBlock, CandidateHashData, CandidateId,
    CandidateSignData, ChainStateSnapshot, FinalCert, FinalVote, NotarCert, ParentId,
    RawCandidate, SignerBitmap, StatsTarget,
};
pub use entities::{
    BlockSeqno, ForkId, Hash, Height, NodeShortId, PeerAddress, PeerShortId, SessionId, ShardId,
    Slot, SourceIdx, Timestamp,
};
pub use errors::CoreError;
pub use rate_limiter::{RateLimit, RateLimiter};
