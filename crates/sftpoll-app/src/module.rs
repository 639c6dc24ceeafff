//! Lifecycle controller owning every polling engine in the process.
//!
//! # Design
//!
//! - Engines are keyed by listener id; at most one engine runs per listener.
//! - Listeners that cannot run are kept in a stale set with a reason until
//!   their configuration changes.
//! - Engines are removed from the map before being stopped so status reads
//!   never wait on a shutdown join.
//! - Module settings live in a shared handle; a property change reaches the
//!   next task immediately and the long backoff of engines started after it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use sftpoll_config::defaults::{
    CONNECT_ERROR_SLEEP_KEY, DOWNLOAD_WAIT_KEY, LISTENERS_KEY, MESSAGE_MAX_BYTES_KEY,
    WORKER_THREAD_LIMIT_KEY,
};
use sftpoll_config::{ChangeKind, ListenerConfig, ListenerRegistry, ModuleSettings};
use sftpoll_engine::{EngineDeps, EnginePhase, PollingEngine};
use sftpoll_events::{Event, EventBus};
use sftpoll_telemetry::Metrics;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ModuleError, ModuleResult};
use crate::host::HostEvent;

/// Running engine as reported by [`ListenerModule::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerStatus {
    /// Listener identifier.
    pub id: Uuid,
    /// Listener display name.
    pub name: String,
    /// Configuration version the engine runs with.
    pub version: i64,
    /// Engine lifecycle phase.
    pub phase: &'static str,
}

/// Listener that cannot run until reconfigured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleListener {
    /// Listener identifier.
    pub id: Uuid,
    /// Machine-readable reason.
    pub reason: String,
}

/// Snapshot of the module's engines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleStatus {
    /// Whether the host has signalled readiness.
    pub ready: bool,
    /// Engines currently owned by the module, by id.
    pub running: Vec<ListenerStatus>,
    /// Stale listeners, by id.
    pub stale: Vec<StaleListener>,
}

#[derive(Default)]
struct ModuleState {
    ready: bool,
    engines: BTreeMap<Uuid, Arc<PollingEngine>>,
    stale: BTreeMap<Uuid, String>,
}

/// Owns the listener registry and every polling engine.
pub struct ListenerModule {
    registry: ListenerRegistry,
    deps: EngineDeps,
    state: Mutex<ModuleState>,
}

impl ListenerModule {
    /// Module using `registry` for configuration and `deps` for every engine.
    #[must_use]
    pub fn new(registry: ListenerRegistry, deps: EngineDeps) -> Self {
        Self {
            registry,
            deps,
            state: Mutex::new(ModuleState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ModuleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registry backing the module.
    #[must_use]
    pub const fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Event bus shared with every engine.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.deps.events
    }

    /// Metrics shared with every engine.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.deps.metrics
    }

    /// Module settings currently in effect.
    #[must_use]
    pub fn settings(&self) -> ModuleSettings {
        self.deps.settings.current()
    }

    /// Start engines now when the host is already accepting messages;
    /// otherwise wait for [`HostEvent::ReadyForMessages`].
    ///
    /// # Errors
    ///
    /// Returns an error when the listener set cannot be loaded.
    pub fn start(&self, host_ready: bool) -> ModuleResult<()> {
        if host_ready {
            self.on_ready()
        } else {
            debug!("host not ready; deferring listener start");
            Ok(())
        }
    }

    /// React to a host lifecycle event.
    ///
    /// # Errors
    ///
    /// Returns an error when the listener set cannot be loaded or reloaded.
    pub fn handle(&self, event: HostEvent) -> ModuleResult<()> {
        debug!(event = event.kind(), "handling host event");
        match event {
            HostEvent::ReadyForMessages => self.on_ready(),
            HostEvent::Stopping => Ok(()),
            HostEvent::ConfigurationInvalidated { key } => match key.as_str() {
                LISTENERS_KEY => self.reconcile(),
                MESSAGE_MAX_BYTES_KEY
                | DOWNLOAD_WAIT_KEY
                | CONNECT_ERROR_SLEEP_KEY
                | WORKER_THREAD_LIMIT_KEY => {
                    self.refresh_settings();
                    Ok(())
                }
                _ => {
                    debug!(key = %key, "ignoring unrelated configuration change");
                    Ok(())
                }
            },
            HostEvent::ModuleUnloaded => {
                self.shutdown();
                Ok(())
            }
        }
    }

    fn on_ready(&self) -> ModuleResult<()> {
        {
            let mut state = self.lock();
            if state.ready {
                return Ok(());
            }
            state.ready = true;
        }
        self.registry
            .init()
            .map_err(|err| ModuleError::config("registry.init", err))?;

        let listeners = self.registry.all();
        info!(listeners = listeners.len(), "starting listeners");
        for config in listeners {
            self.start_listener(config);
        }
        Ok(())
    }

    /// Reload the listener set and start, stop or restart affected engines.
    ///
    /// # Errors
    ///
    /// Returns an error when the listener blob cannot be decoded; running
    /// engines are left untouched in that case.
    pub fn reconcile(&self) -> ModuleResult<()> {
        let changes = self
            .registry
            .on_update()
            .map_err(|err| ModuleError::config("registry.on_update", err))?;
        let ready = self.lock().ready;

        for change in changes {
            info!(listener_id = %change.id, kind = ?change.kind, "applying listener change");
            match change.kind {
                ChangeKind::Deleted => {
                    self.stop_listener(change.id);
                    self.lock().stale.remove(&change.id);
                    self.deps.throttle.forget(change.id);
                }
                ChangeKind::Added | ChangeKind::Updated => {
                    self.stop_listener(change.id);
                    self.lock().stale.remove(&change.id);
                    self.deps.throttle.forget(change.id);
                    if let Some(config) = self.registry.get(change.id).filter(|_| ready) {
                        self.start_listener(config);
                    }
                }
            }
        }
        Ok(())
    }

    /// Re-read module settings from the property store.
    pub fn refresh_settings(&self) {
        let fresh = self.registry.settings();
        self.deps.settings.replace(fresh);
        let pool_limit = self.deps.dispatcher.pool().limit();
        if fresh.worker_thread_limit != pool_limit {
            warn!(
                configured = fresh.worker_thread_limit,
                active = pool_limit,
                "worker thread limit changes apply when the module is reloaded"
            );
        }
        info!(
            max_message_bytes = fresh.max_message_bytes,
            download_wait_secs = fresh.download_wait.as_secs(),
            connect_error_sleep_secs = fresh.connect_error_sleep.as_secs(),
            "module settings refreshed"
        );
    }

    fn start_listener(&self, config: Arc<ListenerConfig>) {
        let id = config.id;
        if !config.active {
            debug!(listener_id = %id, "listener inactive; not starting");
            return;
        }

        let mut deps = self.deps.clone();
        deps.timings.policy.long_backoff = deps.settings.current().connect_error_sleep;
        let engine = match PollingEngine::new(Arc::clone(&config), deps) {
            Ok(engine) => Arc::new(engine),
            Err(err) => {
                warn!(listener_id = %id, error = %err, "listener configuration rejected");
                self.mark_stale(id, err.stale_reason());
                return;
            }
        };
        if let Err(err) = engine.start() {
            warn!(listener_id = %id, error = %err, "failed to start polling engine");
            self.mark_stale(id, err.stale_reason());
            return;
        }

        let previous = {
            let mut state = self.lock();
            state.stale.remove(&id);
            state.engines.insert(id, engine)
        };
        if let Some(previous) = previous {
            retire(&previous);
        }
        info!(listener_id = %id, name = %config.name, "listener started");
    }

    fn stop_listener(&self, id: Uuid) {
        let engine = self.lock().engines.remove(&id);
        if let Some(engine) = engine {
            retire(&engine);
            info!(listener_id = %id, "listener stopped");
        }
    }

    fn mark_stale(&self, id: Uuid, reason: String) {
        self.lock().stale.insert(id, reason.clone());
        self.deps.events.publish(Event::ListenerStale {
            listener_id: id,
            reason,
        });
    }

    /// Move engines whose thread exited on its own into the stale set.
    fn reap_exited(&self) {
        let reaped: Vec<Arc<PollingEngine>> = {
            let mut state = self.lock();
            let exited: Vec<(Uuid, String)> = state
                .engines
                .iter()
                .filter_map(|(id, engine)| engine.fatal_reason().map(|reason| (*id, reason)))
                .collect();
            exited
                .into_iter()
                .filter_map(|(id, reason)| {
                    state.stale.insert(id, reason);
                    state.engines.remove(&id)
                })
                .collect()
        };
        for engine in reaped {
            engine.cleanup();
        }
    }

    /// Stop every engine and shut the worker pool down.
    pub fn shutdown(&self) {
        let engines: Vec<Arc<PollingEngine>> = {
            let mut state = self.lock();
            state.ready = false;
            std::mem::take(&mut state.engines).into_values().collect()
        };
        info!(engines = engines.len(), "shutting down listeners");

        for engine in &engines {
            engine.stop();
        }
        for engine in &engines {
            retire(engine);
        }
        self.deps.dispatcher.shutdown();
    }

    /// Engines and stale listeners as of now.
    #[must_use]
    pub fn status(&self) -> ModuleStatus {
        self.reap_exited();
        let state = self.lock();
        ModuleStatus {
            ready: state.ready,
            running: state
                .engines
                .values()
                .map(|engine| ListenerStatus {
                    id: engine.id(),
                    name: engine.config().name.clone(),
                    version: engine.config().version,
                    phase: phase_label(engine.phase()),
                })
                .collect(),
            stale: state
                .stale
                .iter()
                .map(|(id, reason)| StaleListener {
                    id: *id,
                    reason: reason.clone(),
                })
                .collect(),
        }
    }
}

/// Stop `engine` within its shutdown window. An engine that overruns keeps
/// its connection; its thread closes it when the blocking call returns.
fn retire(engine: &PollingEngine) {
    if engine.ensure_stopped() {
        engine.cleanup();
    } else {
        warn!(listener_id = %engine.id(), "engine still running after shutdown timeout; continuing");
    }
}

const fn phase_label(phase: EnginePhase) -> &'static str {
    match phase {
        EnginePhase::Created => "created",
        EnginePhase::Running => "running",
        EnginePhase::Stopping => "stopping",
        EnginePhase::Stopped => "stopped",
    }
}
