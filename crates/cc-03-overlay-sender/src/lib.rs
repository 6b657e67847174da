//! # Overlay Sender
//!
//! The per-peer send surface the catchain consumes from the transport
//! layer:
//!
//! - [`MtuRegistry`]: effective MTU per `(local id, peer id)` pair with
//!   scoped [`PeersMtuGuard`] overrides,
//! - length framing for byte-stream transports,
//! - the [`OverlaySender`] port (message / query / broadcast).

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod framing;
pub mod mtu;
pub mod port;

pub use framing::{encode_frame, FrameDecoder};
pub use mtu::{MtuRegistry, PeersMtuGuard, DEFAULT_MTU};
pub use port::{OverlaySender, SenderError};
