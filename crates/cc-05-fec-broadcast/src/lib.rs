//! # FEC Broadcast
//!
//! Forward-error-corrected fragmentation for payloads larger than the
//! effective MTU. The codec surface is a contract ([`FecEncoder`] /
//! [`FecDecoder`]); the shipped implementation is a systematic Reed-Solomon
//! code. The broadcast layer tags symbols with the payload's content hash so
//! receivers reassemble out-of-order and tolerate duplicates.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod broadcast;
pub mod codec;
pub mod reed_solomon;

pub use broadcast::{fragment_payload, BroadcastFragment, Reassembler};
pub use codec::{DecodeOutcome, FecDecoder, FecEncoder, FecError, FecParams, Symbol};
pub use reed_solomon::{RsDecoder, RsEncoder};
