//! Event system for pipeline progress
//!
//! An in-process event bus that distributes draft and queue item transitions
//! to subscribers without blocking the scheduler.
//!
//! # Architecture
//!
//! The event bus uses `tokio::sync::broadcast` for multi-subscriber support.
//! Events are emitted by the scheduler and the draft services and can be
//! consumed by any number of subscribers (CLI output, log shipping, tests).
//!
//! # Non-Blocking Behavior
//!
//! If no subscribers exist, events are dropped immediately. Subscribers can
//! lag without blocking emitters; a lagging subscriber loses the oldest
//! events first.
//!
//! # Example
//!
//! ```no_run
//! use libplexcast::service::events::{EventBus, Event};
//! use libplexcast::types::DraftStatus;
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! event_bus.emit(Event::DraftStatusChanged {
//!     draft_id: "abc123".to_string(),
//!     from: DraftStatus::PendingApproval,
//!     to: DraftStatus::Publishing,
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::platforms::PlatformId;
use crate::types::DraftStatus;

/// Event receiver type alias
pub type EventReceiver = broadcast::Receiver<Event>;

/// Event bus for distributing pipeline events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

impl EventBus {
    /// Create a new event bus with the specified capacity
    ///
    /// The capacity determines how many events can be buffered per subscriber
    /// before older events are dropped (if the subscriber is lagging).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Never blocks. With no subscribers the event is dropped.
    pub fn emit(&self, event: Event) {
        // send() only fails when nobody is listening
        let _ = self.sender.send(event);
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Events emitted while drafts move through the pipeline
///
/// Events never carry credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A draft left the `draft` state
    DraftSubmitted {
        draft_id: String,
        requires_approval: bool,
    },

    DraftStatusChanged {
        draft_id: String,
        from: DraftStatus,
        to: DraftStatus,
    },

    /// A queue item was claimed and handed to its publisher
    ItemDispatched {
        item_id: String,
        draft_id: String,
        platform: PlatformId,
        attempt: u32,
    },

    ItemCompleted {
        item_id: String,
        draft_id: String,
        platform: PlatformId,
        published_id: String,
        remote_post_id: String,
    },

    /// A transient failure put the item back in the queue
    ItemRetryScheduled {
        item_id: String,
        draft_id: String,
        platform: PlatformId,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: String,
    },

    ItemFailed {
        item_id: String,
        draft_id: String,
        platform: PlatformId,
        error: String,
    },

    ItemCancelled {
        item_id: String,
        draft_id: String,
        platform: PlatformId,
    },

    /// A publisher reported that the integration's credentials no longer work
    IntegrationExpired {
        integration_id: String,
        platform: PlatformId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_emission_and_subscription() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.emit(Event::DraftSubmitted {
            draft_id: "test123".to_string(),
            requires_approval: true,
        });

        match receiver.recv().await.unwrap() {
            Event::DraftSubmitted {
                draft_id,
                requires_approval,
            } => {
                assert_eq!(draft_id, "test123");
                assert!(requires_approval);
            }
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        let event = Event::ItemCancelled {
            item_id: "item-1".to_string(),
            draft_id: "draft-1".to_string(),
            platform: PlatformId::Mastodon,
        };
        event_bus.emit(event.clone());

        assert_eq!(receiver1.recv().await.unwrap(), event);
        assert_eq!(receiver2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let event_bus = EventBus::new(10);

        // Emit event with no subscribers - should not panic or block
        event_bus.emit(Event::IntegrationExpired {
            integration_id: "int-1".to_string(),
            platform: PlatformId::Twitter,
        });

        assert_eq!(event_bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_does_not_block() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe();

        for i in 0..5 {
            event_bus.emit(Event::ItemFailed {
                item_id: format!("item-{}", i),
                draft_id: "d".to_string(),
                platform: PlatformId::Bluesky,
                error: "boom".to_string(),
            });
        }

        assert!(matches!(
            receiver.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::DraftStatusChanged {
            draft_id: "serial_test".to_string(),
            from: DraftStatus::Publishing,
            to: DraftStatus::Published,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"draft_status_changed""#));
        assert!(json.contains(r#""from":"publishing""#));

        let deserialized: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }

    #[tokio::test]
    async fn test_subscriber_count() {
        let event_bus = EventBus::new(10);
        assert_eq!(event_bus.subscriber_count(), 0);

        let _receiver1 = event_bus.subscribe();
        let _receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);
    }
}
