//! # Event Publisher
//!
//! The bus object owned by one consensus instance: a broadcast channel for
//! events plus the three request/response channels.

use crate::events::{ConsensusEvent, EventFilter};
use crate::requests::{FinalizeBlockChannel, ResolveCandidateChannel, ResolveStateChannel};
use crate::subscriber::Subscription;
use crate::DEFAULT_CHANNEL_CAPACITY;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// The in-process bus of one consensus instance.
pub struct EventBus {
    /// Broadcast sender for events.
    sender: broadcast::Sender<ConsensusEvent>,

    /// `ResolveCandidate(id) -> {candidate, notar_cert}`.
    pub resolve_candidate: ResolveCandidateChannel,

    /// `ResolveState(parent_id) -> {state, gen_utime_exact}`.
    pub resolve_state: ResolveStateChannel,

    /// `FinalizeBlock(candidate, sig_set) -> ack`.
    pub finalize_block: FinalizeBlockChannel,

    /// Total events published.
    events_published: AtomicU64,

    /// Channel capacity.
    capacity: usize,
}

impl EventBus {
    /// Create a bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with the given per-subscriber buffer capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            resolve_candidate: Default::default(),
            resolve_state: Default::default(),
            finalize_block: Default::default(),
            events_published: AtomicU64::new(0),
            capacity,
        }
    }

    /// Publish an event; returns the number of subscribers that received it.
    pub fn publish(&self, event: ConsensusEvent) -> usize {
        let topic = event.topic();
        self.events_published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(event) {
            Ok(receiver_count) => {
                debug!(topic = ?topic, receivers = receiver_count, "event published");
                receiver_count
            }
            Err(e) => {
                warn!(topic = ?topic, error = %e, "event dropped (no receivers)");
                0
            }
        }
    }

    /// Subscribe to events matching a filter.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        debug!(topics = ?filter.topics, "new subscription created");
        Subscription::new(self.sender.subscribe(), filter)
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Total events published so far.
    #[must_use]
    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventTopic;

    #[tokio::test]
    async fn test_publish_no_subscribers() {
        let bus = EventBus::new();
        let receivers = bus.publish(ConsensusEvent::StopRequested);
        assert_eq!(receivers, 0);
        assert_eq!(bus.events_published(), 1);
    }

    #[tokio::test]
    async fn test_publish_with_subscriber() {
        let bus = EventBus::new();
        let _sub = bus.subscribe(EventFilter::all());
        let receivers = bus.publish(ConsensusEvent::StopRequested);
        assert_eq!(receivers, 1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let _sub1 = bus.subscribe(EventFilter::all());
        let _sub2 = bus.subscribe(EventFilter::all());
        let _sub3 = bus.subscribe(EventFilter::topics(vec![EventTopic::Lifecycle]));
        let receivers = bus.publish(ConsensusEvent::StopRequested);
        assert_eq!(receivers, 3);
    }

    #[test]
    fn test_custom_capacity() {
        let bus = EventBus::with_capacity(100);
        assert_eq!(bus.capacity(), 100);
    }
}
