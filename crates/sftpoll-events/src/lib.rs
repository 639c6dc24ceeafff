#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions, clippy::redundant_pub_crate)]

//! Event bus for listener lifecycle and file handling events.
//!
//! The bus provides a typed event enum, sequential identifiers, and replay of
//! recent events for late subscribers. Internally it uses `tokio::broadcast`
//! with a bounded buffer; when the channel overflows, the oldest events are
//! dropped. Publishing never blocks, so engine and worker threads can emit
//! events without a runtime context.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::{Receiver, Sender};
use uuid::Uuid;

/// Identifier assigned to each published event.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// What happened to a claimed file once its task finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileDisposition {
    /// The claimed file was renamed to its `.processed` marker.
    Processed,
    /// The claimed file was removed from the remote directory.
    Deleted,
    /// Housekeeping failed; the `.processing` marker remains.
    Stranded,
}

/// Typed domain events surfaced by the listener module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A polling engine thread started.
    ListenerStarted {
        /// Listener identifier.
        listener_id: Uuid,
        /// Listener display name.
        name: String,
    },
    /// A polling engine thread exited.
    ListenerStopped {
        /// Listener identifier.
        listener_id: Uuid,
    },
    /// A listener cannot run until its configuration changes.
    ListenerStale {
        /// Listener identifier.
        listener_id: Uuid,
        /// Short machine-readable reason.
        reason: String,
    },
    /// A session to the remote host was established.
    ListenerConnected {
        /// Listener identifier.
        listener_id: Uuid,
        /// Remote host.
        host: String,
    },
    /// Establishing a session failed.
    ListenerConnectionFailed {
        /// Listener identifier.
        listener_id: Uuid,
        /// Classified failure kind.
        kind: String,
        /// Human-readable failure detail.
        message: String,
    },
    /// A file was renamed to its `.processing` marker.
    FileClaimed {
        /// Listener identifier.
        listener_id: Uuid,
        /// Original file name.
        file: String,
    },
    /// The worker pool was full; the file will be retried on the next iteration.
    FileDeferred {
        /// Listener identifier.
        listener_id: Uuid,
        /// Original file name.
        file: String,
    },
    /// A file task finished.
    FileCompleted {
        /// Listener identifier.
        listener_id: Uuid,
        /// Original file name.
        file: String,
        /// Final state of the claimed file.
        disposition: FileDisposition,
        /// Whether a reply payload was produced.
        replied: bool,
    },
    /// Uploading a `.response` file failed.
    ResponseUploadFailed {
        /// Listener identifier.
        listener_id: Uuid,
        /// Original file name.
        file: String,
        /// Failure detail.
        message: String,
    },
}

impl Event {
    /// Machine-friendly discriminator.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ListenerStarted { .. } => "listener_started",
            Self::ListenerStopped { .. } => "listener_stopped",
            Self::ListenerStale { .. } => "listener_stale",
            Self::ListenerConnected { .. } => "listener_connected",
            Self::ListenerConnectionFailed { .. } => "listener_connection_failed",
            Self::FileClaimed { .. } => "file_claimed",
            Self::FileDeferred { .. } => "file_deferred",
            Self::FileCompleted { .. } => "file_completed",
            Self::ResponseUploadFailed { .. } => "response_upload_failed",
        }
    }

    /// Listener the event refers to.
    #[must_use]
    pub const fn listener_id(&self) -> Uuid {
        match self {
            Self::ListenerStarted { listener_id, .. }
            | Self::ListenerStopped { listener_id }
            | Self::ListenerStale { listener_id, .. }
            | Self::ListenerConnected { listener_id, .. }
            | Self::ListenerConnectionFailed { listener_id, .. }
            | Self::FileClaimed { listener_id, .. }
            | Self::FileDeferred { listener_id, .. }
            | Self::FileCompleted { listener_id, .. }
            | Self::ResponseUploadFailed { listener_id, .. } => *listener_id,
        }
    }
}

/// Metadata wrapper around events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast and replay capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish an event, assigning it a sequential identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        // No live subscribers is not an error; the replay ring still has it.
        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying buffered events newer than `since_id`.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let backlog = since_id.map_or_else(VecDeque::new, |since| {
            buffer.iter().filter(|item| item.id > since).cloned().collect()
        });
        let receiver = self.sender.subscribe();
        drop(buffer);
        EventStream { backlog, receiver }
    }

    /// Buffered events, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<EventEnvelope> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Returns the last assigned identifier, if any events have been published.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .map(|event| event.id)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream that yields events from the replay backlog, then the live channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive for synchronous callers.
    pub fn try_next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::task;
    use tokio::time::timeout;

    const PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

    fn claimed(index: u128) -> Event {
        Event::FileClaimed {
            listener_id: Uuid::from_u128(index + 1),
            file: format!("order-{index}.xml"),
        }
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() {
        let bus = EventBus::with_capacity(16);

        let mut last_id = 0;
        for i in 0..5 {
            last_id = bus.publish(claimed(i));
        }
        assert_eq!(last_id, 5);

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = stream.next().await {
                received.push(event.id);
            }
        }
        assert_eq!(received, vec![3, 4, 5]);
    }

    #[test]
    fn replay_ring_drops_oldest() {
        let bus = EventBus::with_capacity(2);
        for i in 0..3 {
            bus.publish(claimed(i));
        }
        let ids: Vec<_> = bus.recent().iter().map(|event| event.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(bus.last_event_id(), Some(3));
    }

    #[test]
    fn try_next_drains_without_runtime() {
        let bus = EventBus::with_capacity(8);
        let mut stream = bus.subscribe(None);
        bus.publish(Event::ListenerStopped {
            listener_id: Uuid::nil(),
        });
        let received = stream.try_next().expect("event available");
        assert_eq!(received.event.kind(), "listener_stopped");
        assert!(stream.try_next().is_none());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = Event::FileCompleted {
            listener_id: Uuid::nil(),
            file: "a.xml".to_string(),
            disposition: FileDisposition::Processed,
            replied: true,
        };
        let value = serde_json::to_value(&event).expect("serializes");
        assert_eq!(value["type"], "file_completed");
        assert_eq!(value["disposition"], "processed");
        assert_eq!(event.listener_id(), Uuid::nil());
    }

    #[tokio::test]
    async fn load_test_does_not_stall_publishers() {
        let bus = Arc::new(EventBus::with_capacity(512));
        let mut stream = bus.subscribe(None);

        let publisher = {
            let bus = bus.clone();
            task::spawn(async move {
                for i in 0..500 {
                    let publish_bus = bus.clone();
                    timeout(PUBLISH_TIMEOUT, async move {
                        publish_bus.publish(claimed(i));
                    })
                    .await
                    .expect("publish timed out");
                }
            })
        };

        let consumer = task::spawn(async move {
            let mut ids = HashSet::new();
            while ids.len() < 500 {
                if let Some(event) = stream.next().await {
                    ids.insert(event.id);
                }
            }
            ids
        });

        publisher.await.expect("publisher task panicked");
        let ids = consumer.await.expect("consumer task panicked");
        assert_eq!(ids.len(), 500);
    }
}
