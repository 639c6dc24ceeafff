//! Host runtime lifecycle events and the task that applies them.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::module::ListenerModule;

/// Lifecycle signals delivered by the host runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// The host accepts messages; listeners may start.
    ReadyForMessages,
    /// The host is about to stop. Nothing to do yet.
    Stopping,
    /// A cluster property changed.
    ConfigurationInvalidated {
        /// Property key that changed.
        key: String,
    },
    /// The module is being unloaded; every engine must stop.
    ModuleUnloaded,
}

impl HostEvent {
    /// Short label used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ReadyForMessages => "ready_for_messages",
            Self::Stopping => "stopping",
            Self::ConfigurationInvalidated { .. } => "configuration_invalidated",
            Self::ModuleUnloaded => "module_unloaded",
        }
    }
}

/// Apply host events to `module` in arrival order until the module is
/// unloaded or the sender is dropped, then shut the module down.
///
/// Handlers block on engine joins, so each event runs on a blocking thread.
#[must_use]
pub fn spawn_host_event_loop(
    module: Arc<ListenerModule>,
    mut events: mpsc::Receiver<HostEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let kind = event.kind();
            let unload = event == HostEvent::ModuleUnloaded;
            let handler = Arc::clone(&module);
            match tokio::task::spawn_blocking(move || handler.handle(event)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(event = kind, error = %err, "host event handling failed"),
                Err(err) => warn!(event = kind, error = %err, "host event handler panicked"),
            }
            if unload {
                info!("module unloaded; host event loop exiting");
                return;
            }
        }

        info!("host event channel closed; shutting listeners down");
        if let Err(err) = tokio::task::spawn_blocking(move || module.shutdown()).await {
            warn!(error = %err, "listener shutdown panicked");
        }
    })
}
