//! Span helpers for the module and its listener threads.

use tracing::{Span, span::Entered};
use uuid::Uuid;

use crate::init::build_sha;

/// Guard that keeps the application-level span entered for the lifetime of the process.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter the application-level tracing span for the lifetime of the guard.
    #[must_use]
    pub fn new(mode: impl Into<String>) -> Self {
        let mode = mode.into();
        let span: &'static Span = Box::leak(Box::new(
            tracing::info_span!("sftpoll", mode = %mode, build_sha = %build_sha()),
        ));
        let guard = span.enter();
        Self { _guard: guard }
    }
}

/// Span wrapping everything a polling engine thread logs.
#[must_use]
pub fn listener_span(listener_id: Uuid, name: &str) -> Span {
    tracing::info_span!("listener", listener_id = %listener_id, name = %name)
}

/// Span wrapping a single file task on a worker thread.
#[must_use]
pub fn file_span(listener_id: Uuid, file: &str) -> Span {
    tracing::info_span!("file", listener_id = %listener_id, file = %file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_context_guard_enters_and_drops() {
        let guard = GlobalContextGuard::new("test");
        drop(guard);
    }

    #[test]
    fn spans_can_be_entered() {
        let span = listener_span(Uuid::nil(), "inbound");
        let _entered = span.enter();
        let file = file_span(Uuid::nil(), "a.xml");
        let _inner = file.enter();
    }
}
