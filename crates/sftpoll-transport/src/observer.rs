//! Connection notification sinks.

use sftpoll_events::{Event, EventBus};
use uuid::Uuid;

use crate::error::ConnectError;

/// Receives rate-limited connection notifications.
pub trait ConnectionObserver: Send + Sync {
    /// A session to `host` was established.
    fn on_connected(&self, listener_id: Uuid, host: &str);

    /// Establishing a session failed.
    fn on_connection_error(&self, listener_id: Uuid, error: &ConnectError);
}

/// Observer that publishes notifications on the event bus.
#[derive(Clone)]
pub struct EventBusObserver {
    events: EventBus,
}

impl EventBusObserver {
    /// Publish onto `events`.
    #[must_use]
    pub const fn new(events: EventBus) -> Self {
        Self { events }
    }
}

impl ConnectionObserver for EventBusObserver {
    fn on_connected(&self, listener_id: Uuid, host: &str) {
        self.events.publish(Event::ListenerConnected {
            listener_id,
            host: host.to_string(),
        });
    }

    fn on_connection_error(&self, listener_id: Uuid, error: &ConnectError) {
        self.events.publish(Event::ListenerConnectionFailed {
            listener_id,
            kind: error.kind.label().to_string(),
            message: error.message.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectErrorKind;

    #[test]
    fn publishes_connection_events() {
        let bus = EventBus::with_capacity(8);
        let observer = EventBusObserver::new(bus.clone());
        observer.on_connected(Uuid::nil(), "sftp.test");
        observer.on_connection_error(
            Uuid::nil(),
            &ConnectError {
                kind: ConnectErrorKind::AlgorithmNegotiation,
                message: "kex".to_string(),
            },
        );

        let kinds: Vec<_> = bus
            .recent()
            .into_iter()
            .map(|envelope| envelope.event.kind())
            .collect();
        assert_eq!(kinds, vec!["listener_connected", "listener_connection_failed"]);
    }
}
