//! # Request/Response Channels
//!
//! Point-to-point calls over the bus. Unlike broadcast events, a request
//! kind has exactly one handler: the owning actor registers once and serves
//! an envelope stream; callers get a reply through a oneshot.

use shared_crypto::BlockSignatureSet;
use shared_types::{
    CandidateId, ChainStateSnapshot, CoreError, NotarCert, ParentId, RawCandidate,
};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Bus-level request failures (distinct from handler-level errors carried
/// inside the response type).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// No handler registered for this request kind.
    #[error("no handler registered")]
    NoHandler,

    /// A second handler tried to register.
    #[error("handler already registered")]
    AlreadyRegistered,

    /// The handler dropped the request without answering.
    #[error("handler dropped request")]
    HandlerDropped,
}

/// One in-flight request with its reply slot.
#[derive(Debug)]
pub struct RequestEnvelope<Req, Resp> {
    pub request: Req,
    pub reply: oneshot::Sender<Resp>,
}

impl<Req, Resp> RequestEnvelope<Req, Resp> {
    /// Answer the request. A dropped caller is not an error.
    pub fn respond(self, response: Resp) {
        let _ = self.reply.send(response);
    }
}

/// A single-handler request channel.
#[derive(Debug)]
pub struct RequestChannel<Req, Resp> {
    handler: Mutex<Option<mpsc::UnboundedSender<RequestEnvelope<Req, Resp>>>>,
}

impl<Req, Resp> Default for RequestChannel<Req, Resp> {
    fn default() -> Self {
        Self {
            handler: Mutex::new(None),
        }
    }
}

impl<Req, Resp> RequestChannel<Req, Resp> {
    /// Claim the handler side. Exactly one registration is allowed.
    pub fn register(&self) -> Result<mpsc::UnboundedReceiver<RequestEnvelope<Req, Resp>>, BusError> {
        let mut slot = self.handler.lock();
        if slot.is_some() {
            return Err(BusError::AlreadyRegistered);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *slot = Some(tx);
        Ok(rx)
    }

    /// Send a request and await the handler's reply.
    pub async fn call(&self, request: Req) -> Result<Resp, BusError> {
        let (reply, rx) = oneshot::channel();
        {
            let slot = self.handler.lock();
            let sender = slot.as_ref().ok_or(BusError::NoHandler)?;
            sender
                .send(RequestEnvelope { request, reply })
                .map_err(|_| BusError::NoHandler)?;
        }
        rx.await.map_err(|_| BusError::HandlerDropped)
    }
}

/// Response to `ResolveCandidate`: the stored candidate with its
/// notarization certificate.
#[derive(Clone, Debug)]
pub struct ResolvedCandidate {
    pub candidate: Arc<RawCandidate>,
    pub notar_cert: Arc<NotarCert>,
}

/// Response to `ResolveState`.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedState {
    pub state: Arc<ChainStateSnapshot>,
    pub gen_utime_exact: Option<u64>,
}

/// `FinalizeBlock` hands a candidate and its signature set to the validator
/// manager; the reply is the manager's acknowledgement.
#[derive(Clone, Debug)]
pub struct FinalizeBlockRequest {
    pub candidate: Arc<RawCandidate>,
    pub sig_set: BlockSignatureSet,
}

/// Shorthand for the fallible response types the channels carry.
pub type ResolveCandidateChannel =
    RequestChannel<CandidateId, Result<ResolvedCandidate, CoreError>>;
pub type ResolveStateChannel = RequestChannel<ParentId, Result<ResolvedState, CoreError>>;
pub type FinalizeBlockChannel = RequestChannel<FinalizeBlockRequest, Result<(), CoreError>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_without_handler_fails() {
        let channel: RequestChannel<u32, u32> = RequestChannel::default();
        assert_eq!(channel.call(1).await.unwrap_err(), BusError::NoHandler);
    }

    #[tokio::test]
    async fn test_second_registration_rejected() {
        let channel: RequestChannel<u32, u32> = RequestChannel::default();
        let _rx = channel.register().unwrap();
        assert!(matches!(
            channel.register(),
            Err(BusError::AlreadyRegistered)
        ));
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let channel: Arc<RequestChannel<u32, u32>> = Arc::new(RequestChannel::default());
        let mut rx = channel.register().unwrap();

        let server = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let doubled = envelope.request * 2;
                envelope.respond(doubled);
            }
        });

        assert_eq!(channel.call(21).await.unwrap(), 42);
        server.abort();
    }

    #[tokio::test]
    async fn test_dropped_reply_reported() {
        let channel: Arc<RequestChannel<u32, u32>> = Arc::new(RequestChannel::default());
        let mut rx = channel.register().unwrap();

        tokio::spawn(async move {
            // Drop the envelope without answering.
            let _ = rx.recv().await;
        });

        assert_eq!(channel.call(1).await.unwrap_err(), BusError::HandlerDropped);
    }
}
