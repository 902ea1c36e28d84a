//! In-process typed publish/subscribe.
//!
//! Delivery is fire-and-forget over a broadcast channel: publishing never
//! blocks and never fails the publisher, and a slow subscriber only loses
//! its own events (the channel reports the lag to that subscriber alone).

use crate::session::SessionSnapshot;
use crate::transfer::Transfer;
use drift_index::FillState;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Everything observable that happens inside the daemon.
#[derive(Debug, Clone)]
pub enum Event {
    /// A transfer changed state; carries the full post-transition snapshot.
    TransferChanged(Box<Transfer>),
    /// Periodic byte progress for an in-flight transfer.
    TransferProgress {
        /// Transfer identifier.
        id: Uuid,
        /// Counterparty username.
        username: String,
        /// Cumulative bytes transferred.
        bytes_transferred: u64,
        /// Average speed in bytes per second over the sliding window.
        average_speed: f64,
    },
    /// The overlay session changed phase.
    SessionChanged(SessionSnapshot),
    /// An event pushed by the overlay server (messages, peer status).
    Overlay(drift_proto::ServerEvent),
    /// The share scan advanced.
    ShareScan(FillState),
    /// An agent authenticated and registered.
    AgentRegistered {
        /// Agent name.
        name: String,
    },
    /// An agent disconnected or was replaced.
    AgentDeregistered {
        /// Agent name.
        name: String,
    },
}

/// The daemon-wide event bus.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(1024)
    }
}

impl EventBus {
    /// Create a bus with the given per-subscriber buffer depth.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: Event) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all subsequent events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(Event::AgentRegistered {
            name: "a1".to_string(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_each_subscriber_sees_events() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(Event::AgentRegistered {
            name: "a1".to_string(),
        });

        assert!(matches!(
            rx1.recv().await.unwrap(),
            Event::AgentRegistered { .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            Event::AgentRegistered { .. }
        ));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_isolated() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe();

        for i in 0..8 {
            bus.publish(Event::AgentRegistered {
                name: format!("a{i}"),
            });
        }

        // The slow subscriber observes its own lag...
        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));

        // ...and a fresh subscriber still receives new events.
        let mut fresh = bus.subscribe();
        bus.publish(Event::AgentDeregistered {
            name: "a9".to_string(),
        });
        assert!(matches!(
            fresh.recv().await.unwrap(),
            Event::AgentDeregistered { .. }
        ));
    }
}
