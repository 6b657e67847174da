//! # Actors
//!
//! An actor owns its data and processes one message at a time from an
//! unbounded mailbox. Cross-actor communication goes through typed messages;
//! request/response uses [`ActorRef::ask`] with a oneshot reply.

use async_trait::async_trait;
use std::ops::ControlFlow;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Sending to a stopped actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("actor mailbox closed")]
pub struct SendError;

/// A single-threaded unit of locality.
///
/// `handle` returning [`ControlFlow::Break`] stops the mailbox loop;
/// `stopped` runs exactly once afterwards.
#[async_trait]
pub trait Actor: Send + 'static {
    type Message: Send + 'static;

    /// Runs once before the first message.
    async fn started(&mut self) {}

    /// Process one message. Messages of one actor never overlap.
    async fn handle(&mut self, message: Self::Message) -> ControlFlow<()>;

    /// Runs once after the loop exits (break or mailbox closed).
    async fn stopped(&mut self) {}
}

/// Cheap cloneable handle to an actor's mailbox.
#[derive(Debug)]
pub struct ActorRef<M> {
    tx: mpsc::UnboundedSender<M>,
}

impl<M> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M: Send + 'static> ActorRef<M> {
    /// Enqueue a message. Per-sender FIFO order is preserved.
    pub fn send(&self, message: M) -> Result<(), SendError> {
        self.tx.send(message).map_err(|_| SendError)
    }

    /// Request/response: build the message around a reply slot and await the
    /// answer. The promise bridge for callback-style actor methods.
    pub async fn ask<R>(
        &self,
        make_message: impl FnOnce(oneshot::Sender<R>) -> M,
    ) -> Result<R, SendError> {
        let (reply, rx) = oneshot::channel();
        self.send(make_message(reply))?;
        rx.await.map_err(|_| SendError)
    }

    /// Whether the actor is still accepting messages.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Spawn an actor onto the scheduler; the handle resolves when the actor
/// stops.
pub fn spawn_actor<A: Actor>(mut actor: A) -> (ActorRef<A::Message>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        actor.started().await;
        while let Some(message) = rx.recv().await {
            if actor.handle(message).await.is_break() {
                break;
            }
        }
        rx.close();
        actor.stopped().await;
        debug!("actor stopped");
    });
    (ActorRef { tx }, handle)
}
