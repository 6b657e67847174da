//! # Event Subscriber
//!
//! Receiving side of the bus. Each subscription sees events in publish
//! order; a subscriber that falls more than the channel capacity behind
//! loses the oldest events and is told how many.

use crate::events::{ConsensusEvent, EventFilter};
use tokio::sync::broadcast;
use tracing::debug;

/// A subscription handle for receiving events.
pub struct Subscription {
    receiver: broadcast::Receiver<ConsensusEvent>,
    filter: EventFilter,
}

impl Subscription {
    pub(crate) fn new(receiver: broadcast::Receiver<ConsensusEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next event that matches the filter.
    ///
    /// Returns `None` when the bus is gone.
    pub async fn recv(&mut self) -> Option<ConsensusEvent> {
        loop {
            let event = match self.receiver.recv().await {
                Ok(e) => e,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(lagged = count, "subscriber lagged, events dropped");
                    continue;
                }
            };
            if self.filter.matches(&event) {
                return Some(event);
            }
        }
    }

    /// Receive without blocking: `Ok(None)` when no event is ready.
    pub fn try_recv(&mut self) -> Result<Option<ConsensusEvent>, broadcast::error::TryRecvError> {
        loop {
            let event = match self.receiver.try_recv() {
                Ok(e) => e,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(e) => return Err(e),
            };
            if self.filter.matches(&event) {
                return Ok(Some(event));
            }
        }
    }

    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventTopic;
    use crate::publisher::EventBus;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_subscription_recv() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());

        bus.publish(ConsensusEvent::StopRequested);

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert!(matches!(received, ConsensusEvent::StopRequested));
    }

    #[tokio::test]
    async fn test_subscription_filter_skips_other_topics() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventFilter::topics(vec![EventTopic::LeaderWindow]));

        bus.publish(ConsensusEvent::StopRequested);
        bus.publish(ConsensusEvent::OurLeaderWindowAborted { start_slot: 9 });

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert!(matches!(
            received,
            ConsensusEvent::OurLeaderWindowAborted { start_slot: 9 }
        ));
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());
        assert!(matches!(sub.try_recv(), Ok(None)));
    }

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());

        for slot in 0..5 {
            bus.publish(ConsensusEvent::OurLeaderWindowAborted { start_slot: slot });
        }
        for expected in 0..5 {
            match sub.recv().await.expect("event") {
                ConsensusEvent::OurLeaderWindowAborted { start_slot } => {
                    assert_eq!(start_slot, expected);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }
}
