//! Process-wide rate limiting for connection notifications.
//!
//! A sustained outage would otherwise emit one audit event per retry. Each
//! listener gets one notification per kind per quiet window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use uuid::Uuid;

/// Quiet window applied by [`NotificationThrottle::global`].
pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Notification category tracked independently per listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// Session established.
    Connected,
    /// Session establishment failed.
    ConnectionError,
}

static GLOBAL: Lazy<NotificationThrottle> =
    Lazy::new(|| NotificationThrottle::new(DEFAULT_QUIET_WINDOW));

/// Shared record of when each listener last notified.
#[derive(Debug, Clone)]
pub struct NotificationThrottle {
    window: Duration,
    last_fired: Arc<Mutex<HashMap<(Uuid, NotificationKind), Instant>>>,
}

impl NotificationThrottle {
    /// Independent throttle with its own window and history.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Process-wide throttle shared by every connection client.
    #[must_use]
    pub fn global() -> Self {
        GLOBAL.clone()
    }

    /// Whether a notification may fire now; records the firing when it may.
    #[must_use]
    pub fn permit(&self, listener: Uuid, kind: NotificationKind) -> bool {
        self.permit_at(listener, kind, Instant::now())
    }

    fn permit_at(&self, listener: Uuid, kind: NotificationKind, now: Instant) -> bool {
        let mut last_fired = self
            .last_fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match last_fired.get(&(listener, kind)) {
            Some(previous) if now.saturating_duration_since(*previous) < self.window => false,
            _ => {
                last_fired.insert((listener, kind), now);
                true
            }
        }
    }

    /// Drop history for a listener so its next notification fires immediately.
    pub fn forget(&self, listener: Uuid) {
        self.last_fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _), _| *id != listener);
    }
}
