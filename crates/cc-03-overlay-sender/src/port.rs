//! # Overlay Sender Port
//!
//! The contract the catchain and DHT consume from the transport layer. The
//! UDP/handshake internals live outside this repository; implementations in
//! the test suite are in-memory meshes.

use async_trait::async_trait;
use bytes::Bytes;
use shared_types::PeerShortId;
use std::time::Duration;
use thiserror::Error;

/// Transport-level send failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SenderError {
    #[error("peer unreachable")]
    Unreachable,

    #[error("query timeout")]
    Timeout,

    #[error("answer too large: {0} bytes")]
    AnswerTooLarge(u64),

    #[error("transport closed")]
    Closed,
}

/// Authenticated unicast send surface keyed by `(local id, peer id)`.
#[async_trait]
pub trait OverlaySender: Send + Sync {
    /// Fire-and-forget message.
    async fn send_message(
        &self,
        src: PeerShortId,
        dst: PeerShortId,
        data: Bytes,
    ) -> Result<(), SenderError>;

    /// Query with a reply, bounded by `timeout` and `max_answer_size`.
    async fn send_query(
        &self,
        src: PeerShortId,
        dst: PeerShortId,
        name: &str,
        data: Bytes,
        timeout: Duration,
        max_answer_size: u64,
    ) -> Result<Bytes, SenderError>;

    /// Gossip broadcast into the overlay; delivery is best-effort and
    /// deduplicated by content hash downstream.
    async fn send_broadcast(&self, src: PeerShortId, data: Bytes) -> Result<(), SenderError>;
}
