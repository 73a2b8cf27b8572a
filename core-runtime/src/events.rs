//! # Event Bus System
//!
//! Provides a broadcast of sync lifecycle events using `tokio::sync::broadcast`.
//! Operator surfaces (admin pages, CLIs, dashboards) subscribe here instead of
//! polling the persisted process metadata.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: [`SyncEvent`], one variant per lifecycle transition
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ BackgroundSync A ├────────>│           ├────────────>│ Subscriber │
//! └──────────────────┘         │ EventBus  │             └────────────┘
//! ┌──────────────────┐  emit   │ (broadcast│  subscribe  ┌────────────┐
//! │ BackgroundSync B ├────────>│  channel) ├────────────>│ Subscriber │
//! └──────────────────┘         └───────────┘             └────────────┘
//! ```
//!
//! Emitting with no subscriber returns an error the engine ignores; events
//! are a convenience, never a source of truth.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, EventStream, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = EventStream::new(event_bus.subscribe())
//!     .filter(|event| matches!(event, SyncEvent::Stopped { .. }));
//!
//! event_bus
//!     .emit(SyncEvent::Stopped {
//!         action: "bg_library_sync".to_string(),
//!         processed: 12,
//!         reason: Some("Not connected to remote storage".to_string()),
//!     })
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.action(), "bg_library_sync");
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{self, error::RecvError, error::SendError};

pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Event Types
// ============================================================================

/// Events emitted by background sync jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A job was started and its queue populated.
    Started {
        /// Job action name.
        action: String,
        /// Items enqueued at start.
        total: u64,
    },
    /// An item finished successfully.
    Progress {
        action: String,
        /// Items processed so far in this run.
        processed: u64,
        total: u64,
        /// Progress percentage (0-100).
        percent: u8,
    },
    /// An item was dropped as unprocessable; the job continues.
    ItemSkipped {
        action: String,
        item: String,
        reason: String,
    },
    /// The queue drained.
    Completed {
        action: String,
        processed: u64,
        /// Seconds since start.
        duration_secs: u64,
    },
    /// The job was stopped by an operator or by a fatal error.
    Stopped {
        action: String,
        processed: u64,
        /// Error that stopped the job, `None` for an operator stop.
        reason: Option<String>,
    },
}

impl SyncEvent {
    /// Action name of the job that emitted the event.
    pub fn action(&self) -> &str {
        match self {
            SyncEvent::Started { action, .. }
            | SyncEvent::Progress { action, .. }
            | SyncEvent::ItemSkipped { action, .. }
            | SyncEvent::Completed { action, .. }
            | SyncEvent::Stopped { action, .. } => action,
        }
    }

    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Progress { .. } => "Sync in progress",
            SyncEvent::ItemSkipped { .. } => "Item skipped",
            SyncEvent::Completed { .. } => "Sync completed",
            SyncEvent::Stopped { reason: None, .. } => "Sync stopped",
            SyncEvent::Stopped { .. } => "Sync stopped due to error",
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            SyncEvent::Stopped {
                reason: Some(_), ..
            } => EventSeverity::Error,
            SyncEvent::ItemSkipped { .. } => EventSeverity::Warning,
            SyncEvent::Started { .. } | SyncEvent::Completed { .. } | SyncEvent::Stopped { .. } => {
                EventSeverity::Info
            }
            SyncEvent::Progress { .. } => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned for each subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   When a subscriber falls behind by more than this amount, it will
    ///   receive a `RecvError::Lagged` error.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns an error if there are no active subscribers.
    pub fn emit(&self, event: SyncEvent) -> Result<usize, SendError<SyncEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.subscriber_count(), 0);
    ///
    /// let _subscriber = event_bus.subscribe();
    /// assert_eq!(event_bus.subscriber_count(), 1);
    /// ```
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&SyncEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with additional filtering capabilities.
pub struct EventStream {
    receiver: Receiver<SyncEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<SyncEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter function to this stream.
    ///
    /// Only events that match the filter will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&SyncEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Only events emitted by the job with the given action name.
    pub fn for_action(self, action: impl Into<String>) -> Self {
        let action = action.into();
        self.filter(move |event| event.action() == action)
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<SyncEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<SyncEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn started(action: &str) -> SyncEvent {
        SyncEvent::Started {
            action: action.to_string(),
            total: 3,
        }
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(started("bg_library_sync")).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = started("bg_library_sync");
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_filters_by_action() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe()).for_action("bg_non_library_sync");

        bus.emit(started("bg_library_sync")).ok();
        let wanted = started("bg_non_library_sync");
        bus.emit(wanted.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), wanted);
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for processed in 0..5 {
            bus.emit(SyncEvent::Progress {
                action: "bg_library_sync".to_string(),
                processed,
                total: 5,
                percent: (processed * 20) as u8,
            })
            .ok();
        }

        let result = sub.recv().await;
        assert!(matches!(result, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity_and_description() {
        let fatal = SyncEvent::Stopped {
            action: "a".to_string(),
            processed: 1,
            reason: Some("Not connected".to_string()),
        };
        assert_eq!(fatal.severity(), EventSeverity::Error);
        assert_eq!(fatal.description(), "Sync stopped due to error");

        let manual = SyncEvent::Stopped {
            action: "a".to_string(),
            processed: 1,
            reason: None,
        };
        assert_eq!(manual.severity(), EventSeverity::Info);
        assert_eq!(manual.description(), "Sync stopped");

        let skipped = SyncEvent::ItemSkipped {
            action: "a".to_string(),
            item: "7".to_string(),
            reason: "missing".to_string(),
        };
        assert_eq!(skipped.severity(), EventSeverity::Warning);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = SyncEvent::Completed {
            action: "bg_library_sync".to_string(),
            processed: 10,
            duration_secs: 42,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "Completed");
        assert_eq!(json["processed"], 10);

        let back: SyncEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_try_recv() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe());
        assert!(stream.try_recv().is_none());

        bus.emit(started("bg_library_sync")).ok();
        let received = stream.try_recv().unwrap().unwrap();
        assert_eq!(received.action(), "bg_library_sync");
    }
}
