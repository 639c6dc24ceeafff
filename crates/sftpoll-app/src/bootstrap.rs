use std::sync::Arc;

use sftpoll_config::{ListenerRegistry, PropertyStore, SecretResolver, SharedSettings};
use sftpoll_core::{MessageProcessor, SessionConnector};
use sftpoll_engine::{Dispatcher, EngineDeps, EngineTimings, WorkerPool};
use sftpoll_events::EventBus;
use sftpoll_telemetry::{GlobalContextGuard, LoggingConfig, Metrics, init_logging};
use sftpoll_transport::NotificationThrottle;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ModuleError, ModuleResult};
use crate::host::{HostEvent, spawn_host_event_loop};
use crate::module::ListenerModule;

/// Collaborators supplied by the host runtime.
pub struct ModuleDependencies {
    /// Cluster property store.
    pub properties: Arc<dyn PropertyStore>,
    /// Stored credential decryption.
    pub secrets: Arc<dyn SecretResolver>,
    /// Opens SFTP sessions.
    pub connector: Arc<dyn SessionConnector>,
    /// Downstream message processor.
    pub processor: Arc<dyn MessageProcessor>,
    /// Event sink for audit and domain events.
    pub events: EventBus,
}

/// Build the module and its shared worker pool on `runtime`.
///
/// # Errors
///
/// Returns an error when the metrics registry cannot be created.
pub fn build_module(dependencies: ModuleDependencies, runtime: Handle) -> ModuleResult<ListenerModule> {
    let ModuleDependencies {
        properties,
        secrets,
        connector,
        processor,
        events,
    } = dependencies;

    let registry = ListenerRegistry::new(properties, secrets);
    let settings = registry.settings();
    let metrics =
        Metrics::new().map_err(|err| ModuleError::telemetry("telemetry.metrics", err))?;
    let pool = WorkerPool::new(runtime, settings.worker_thread_limit);
    info!(
        worker_thread_limit = settings.worker_thread_limit,
        max_message_bytes = settings.max_message_bytes,
        connect_error_sleep_secs = settings.connect_error_sleep.as_secs(),
        "listener module configured"
    );

    Ok(ListenerModule::new(
        registry,
        EngineDeps {
            connector,
            processor,
            dispatcher: Dispatcher::new(pool),
            events,
            metrics,
            settings: SharedSettings::new(settings),
            timings: EngineTimings::from_settings(&settings),
            throttle: NotificationThrottle::global(),
        },
    ))
}

/// Install logging, then run the module until it is unloaded.
///
/// # Errors
///
/// Returns an error if logging, module construction or the initial start fails.
pub async fn run_module(
    dependencies: ModuleDependencies,
    logging: &LoggingConfig<'_>,
    host_ready: bool,
    host_events: mpsc::Receiver<HostEvent>,
) -> ModuleResult<()> {
    init_logging(logging).map_err(|err| ModuleError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new("listener-module");
    run_module_with(dependencies, host_ready, host_events).await
}

/// Run the module with injected dependencies; logging is left to the caller.
///
/// # Errors
///
/// Returns an error if module construction or the initial start fails.
pub async fn run_module_with(
    dependencies: ModuleDependencies,
    host_ready: bool,
    host_events: mpsc::Receiver<HostEvent>,
) -> ModuleResult<()> {
    let module = Arc::new(build_module(dependencies, Handle::current())?);
    info!(host_ready, "listener module starting");

    let starter = Arc::clone(&module);
    tokio::task::spawn_blocking(move || starter.start(host_ready))
        .await
        .map_err(|source| ModuleError::EventLoop { source })??;

    let metrics = module.metrics().clone();
    spawn_host_event_loop(module, host_events)
        .await
        .map_err(|source| ModuleError::EventLoop { source })?;
    match metrics.render() {
        Ok(rendered) => debug!(metrics = %rendered, "final listener metrics"),
        Err(err) => warn!(error = %err, "failed to render final metrics"),
    }
    info!("listener module stopped");
    Ok(())
}
