//! # Event Bus System
//!
//! Lifecycle events for the controller core, published over a
//! `broadcast` channel so hosts can observe cache synchronisation and
//! reconcile outcomes without hooking into the worker loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐     emit      ┌───────────┐
//! │ Reflector ├──────────────>│           │     subscribe    ┌────────────┐
//! └───────────┘               │ EventBus  ├─────────────────>│ Subscriber │
//!                             │ (broadcast│                  └────────────┘
//! ┌───────────┐     emit      │  channel) │     subscribe    ┌────────────┐
//! │  Workers  ├──────────────>│           ├─────────────────>│ Subscriber │
//! └───────────┘               └───────────┘                  └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CacheEvent, ControllerEvent, EventBus};
//!
//! let bus = EventBus::new(16);
//! let mut sub = bus.subscribe();
//!
//! bus.emit(ControllerEvent::Cache(CacheEvent::Synced {
//!     controller: "deployments".to_string(),
//!     objects: 3,
//!     resource_version: 42,
//! }))
//! .ok();
//!
//! assert!(sub.try_recv().is_ok());
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber fell behind and missed `n`
//!   events. Non-fatal.
//! - **`RecvError::Closed`**: every sender is gone; the controller shut down.
//!
//! Emitting with no subscribers returns `Err`; publishers ignore it.

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = crate::config::DEFAULT_EVENT_BUFFER_SIZE;

// ============================================================================
// Event Types
// ============================================================================

/// Top-level event published by a running controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum ControllerEvent {
    /// Local mirror lifecycle
    Cache(CacheEvent),
    /// Worker outcomes
    Reconcile(ReconcileEvent),
}

impl ControllerEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            ControllerEvent::Cache(e) => e.description(),
            ControllerEvent::Reconcile(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            ControllerEvent::Reconcile(ReconcileEvent::Dropped { .. }) => EventSeverity::Error,
            ControllerEvent::Cache(CacheEvent::WatchExpired { .. }) => EventSeverity::Warning,
            ControllerEvent::Cache(CacheEvent::ListFailed { .. }) => EventSeverity::Warning,
            ControllerEvent::Reconcile(ReconcileEvent::Requeued { .. }) => EventSeverity::Warning,
            ControllerEvent::Cache(CacheEvent::Synced { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Name of the controller that published the event.
    pub fn controller(&self) -> &str {
        match self {
            ControllerEvent::Cache(e) => e.controller(),
            ControllerEvent::Reconcile(e) => e.controller(),
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Events emitted by the reflector while it maintains the local mirror.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// The initial snapshot is installed and dispatched; the sync gate opened.
    Synced {
        controller: String,
        objects: usize,
        resource_version: u64,
    },
    /// A full relist replaced the mirror after the initial sync.
    Relisted {
        controller: String,
        objects: usize,
        resource_version: u64,
    },
    /// The change stream ended and was resumed from `resource_version`.
    WatchRestarted {
        controller: String,
        resource_version: u64,
    },
    /// The source no longer retains history back to `requested`.
    WatchExpired {
        controller: String,
        requested: u64,
    },
    /// Listing failed; the reflector retries after `retry_in_ms`.
    ListFailed {
        controller: String,
        message: String,
        retry_in_ms: u64,
    },
}

impl CacheEvent {
    pub fn description(&self) -> &str {
        match self {
            CacheEvent::Synced { .. } => "Cache synced",
            CacheEvent::Relisted { .. } => "Cache relisted",
            CacheEvent::WatchRestarted { .. } => "Watch restarted",
            CacheEvent::WatchExpired { .. } => "Watch history expired",
            CacheEvent::ListFailed { .. } => "List failed",
        }
    }

    fn controller(&self) -> &str {
        match self {
            CacheEvent::Synced { controller, .. }
            | CacheEvent::Relisted { controller, .. }
            | CacheEvent::WatchRestarted { controller, .. }
            | CacheEvent::WatchExpired { controller, .. }
            | CacheEvent::ListFailed { controller, .. } => controller,
        }
    }
}

/// Events emitted by workers after each reconcile attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ReconcileEvent {
    /// Reconcile returned success; the key's failure history was cleared.
    Succeeded { controller: String, key: String },
    /// Reconcile failed and the key was scheduled again.
    Requeued {
        controller: String,
        key: String,
        attempt: u32,
        delay_ms: u64,
    },
    /// The retry budget is exhausted; the key is forgotten.
    Dropped {
        controller: String,
        key: String,
        attempts: u32,
        error: String,
    },
}

impl ReconcileEvent {
    pub fn description(&self) -> &str {
        match self {
            ReconcileEvent::Succeeded { .. } => "Reconcile succeeded",
            ReconcileEvent::Requeued { .. } => "Reconcile failed, requeued",
            ReconcileEvent::Dropped { .. } => "Reconcile failed, retries exhausted",
        }
    }

    /// Key the event refers to.
    pub fn key(&self) -> &str {
        match self {
            ReconcileEvent::Succeeded { key, .. }
            | ReconcileEvent::Requeued { key, .. }
            | ReconcileEvent::Dropped { key, .. } => key,
        }
    }

    fn controller(&self) -> &str {
        match self {
            ReconcileEvent::Succeeded { controller, .. }
            | ReconcileEvent::Requeued { controller, .. }
            | ReconcileEvent::Dropped { controller, .. } => controller,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for [`ControllerEvent`]s. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ControllerEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per
    /// subscriber. Slower subscribers receive `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received it, or an error when
    /// nobody is listening.
    pub fn emit(&self, event: ControllerEvent) -> Result<usize, SendError<ControllerEvent>> {
        self.sender.send(event)
    }

    /// Creates a receiver for all future events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<ControllerEvent> {
        self.sender.subscribe()
    }

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

type EventFilter = Box<dyn Fn(&ControllerEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{ControllerEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let drops = EventStream::new(bus.subscribe()).filter(|event| {
///     matches!(event, ControllerEvent::Reconcile(_))
/// });
/// # drop(drops);
/// ```
pub struct EventStream {
    receiver: Receiver<ControllerEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<ControllerEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv`/`try_recv`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ControllerEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Restricts the stream to events at or above `min`.
    pub fn min_severity(self, min: EventSeverity) -> Self {
        self.filter(move |event| event.severity() >= min)
    }

    fn matches(&self, event: &ControllerEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<ControllerEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without waiting.
    ///
    /// Returns `None` if no matching event is currently buffered.
    pub fn try_recv(&mut self) -> Option<Result<ControllerEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn synced(objects: usize) -> ControllerEvent {
        ControllerEvent::Cache(CacheEvent::Synced {
            controller: "deployments".to_string(),
            objects,
            resource_version: 7,
        })
    }

    fn dropped(key: &str) -> ControllerEvent {
        ControllerEvent::Reconcile(ReconcileEvent::Dropped {
            controller: "deployments".to_string(),
            key: key.to_string(),
            attempts: 6,
            error: "boom".to_string(),
        })
    }

    #[test]
    fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.emit(synced(1)).is_err());
    }

    #[core_async::test]
    async fn test_all_subscribers_receive_event() {
        let bus = EventBus::new(4);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.emit(synced(2)).unwrap(), 2);
        assert_eq!(first.recv().await.unwrap(), synced(2));
        assert_eq!(second.recv().await.unwrap(), synced(2));
    }

    #[core_async::test]
    async fn test_stream_filter_skips_other_events() {
        let bus = EventBus::new(8);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, ControllerEvent::Reconcile(_)));

        bus.emit(synced(1)).ok();
        bus.emit(dropped("default/web")).ok();

        assert_eq!(stream.recv().await.unwrap(), dropped("default/web"));
    }

    #[test]
    fn test_min_severity_filter() {
        let bus = EventBus::new(8);
        let mut stream = EventStream::new(bus.subscribe()).min_severity(EventSeverity::Error);

        bus.emit(synced(1)).ok();
        bus.emit(ControllerEvent::Reconcile(ReconcileEvent::Succeeded {
            controller: "deployments".to_string(),
            key: "default/web".to_string(),
        }))
        .ok();
        bus.emit(dropped("default/api")).ok();

        let event = stream.try_recv().unwrap().unwrap();
        assert_eq!(event, dropped("default/api"));
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.emit(synced(i)).ok();
        }
        assert!(matches!(
            sub.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
    }

    #[test]
    fn test_severity_and_description() {
        assert_eq!(dropped("a").severity(), EventSeverity::Error);
        assert_eq!(synced(0).severity(), EventSeverity::Info);
        let restarted = ControllerEvent::Cache(CacheEvent::WatchRestarted {
            controller: "services".to_string(),
            resource_version: 3,
        });
        assert_eq!(restarted.severity(), EventSeverity::Debug);
        assert_eq!(restarted.description(), "Watch restarted");
        assert_eq!(restarted.controller(), "services");
    }

    #[test]
    fn test_event_serialization() {
        let event = ControllerEvent::Reconcile(ReconcileEvent::Requeued {
            controller: "deployments".to_string(),
            key: "default/web".to_string(),
            attempt: 2,
            delay_ms: 10,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Reconcile\""));
        assert!(json.contains("default/web"));

        let parsed: ControllerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[core_async::test(multi_thread)]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new(64);
        let mut sub = bus.subscribe();

        let mut handles = Vec::new();
        for worker in 0..2 {
            let bus = bus.clone();
            handles.push(core_async::spawn(async move {
                for i in 0..10 {
                    bus.emit(dropped(&format!("ns/{}-{}", worker, i))).ok();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut count = 0;
        while sub.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 20);
    }
}
