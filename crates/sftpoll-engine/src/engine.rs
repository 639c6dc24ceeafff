//! Per-listener polling engine.
//!
//! # Design
//!
//! - Each engine owns one OS thread that scans, claims and dispatches files.
//! - Sleeps wait on a condition variable so a stop request wakes the thread
//!   immediately.
//! - A missing remote directory is fatal: the thread exits and the engine
//!   reports a stale reason until its configuration changes.
//! - Any other failure resets the connection and backs off, switching to the
//!   long backoff after repeated failures.
//! - Claimed files that were never dispatched are renamed back to their
//!   original names when the thread exits.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use sftpoll_config::{ListenerConfig, SharedSettings, validate_listener};
use sftpoll_core::{MessageProcessor, PROCESSING_SUFFIX, SessionConnector};
use sftpoll_events::{Event, EventBus};
use sftpoll_telemetry::{Metrics, listener_span};
use sftpoll_transport::{ConnectionClient, EventBusObserver, NotificationThrottle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::claim::claim_files;
use crate::dispatch::Dispatcher;
use crate::error::{ClaimError, ListenerError, ListenerResult};
use crate::state::{EngineState, EngineTimings};
use crate::task::TaskContext;

/// Shared collaborators handed to every engine.
#[derive(Clone)]
pub struct EngineDeps {
    /// Opens SFTP sessions.
    pub connector: Arc<dyn SessionConnector>,
    /// Downstream message processor.
    pub processor: Arc<dyn MessageProcessor>,
    /// Process-wide dispatcher.
    pub dispatcher: Dispatcher,
    /// Event sink.
    pub events: EventBus,
    /// Metrics registry.
    pub metrics: Metrics,
    /// Module-wide limits, updated in place when properties change.
    pub settings: SharedSettings,
    /// Loop timings.
    pub timings: EngineTimings,
    /// Connection notification throttle.
    pub throttle: NotificationThrottle,
}

/// Lifecycle phase of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Constructed, thread not started.
    Created,
    /// Thread running.
    Running,
    /// Stop requested, thread not yet exited.
    Stopping,
    /// Thread exited or never started.
    Stopped,
}

#[derive(Debug)]
struct ControlState {
    phase: EnginePhase,
    stop_requested_at: Option<Instant>,
    exited: bool,
    fatal: Option<String>,
}

#[derive(Debug)]
struct Control {
    state: Mutex<ControlState>,
    signal: Condvar,
}

impl Control {
    fn new() -> Self {
        Self {
            state: Mutex::new(ControlState {
                phase: EnginePhase::Created,
                stop_requested_at: None,
                exited: false,
                fatal: None,
            }),
            signal: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_requested(&self) -> bool {
        self.lock().stop_requested_at.is_some()
    }

    fn sleep(&self, duration: Duration) {
        let guard = self.lock();
        let _ = self
            .signal
            .wait_timeout_while(guard, duration, |state| state.stop_requested_at.is_none())
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn mark_exited(&self, fatal: Option<String>) {
        let mut state = self.lock();
        state.phase = EnginePhase::Stopped;
        state.exited = true;
        state.fatal = fatal;
        drop(state);
        self.signal.notify_all();
    }
}

/// What the loop does after an iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    /// Iterate again immediately.
    Continue,
    /// Wait before the next iteration.
    Sleep(Duration),
    /// Leave the loop; the listener is stale.
    Exit(String),
}

/// Polling engine for one listener.
pub struct PollingEngine {
    context: Arc<TaskContext>,
    dispatcher: Dispatcher,
    timings: EngineTimings,
    control: Arc<Control>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PollingEngine {
    /// Validate `config` and build an engine that has not started yet.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::InvalidConfig`] when the listener cannot run.
    pub fn new(config: Arc<ListenerConfig>, deps: EngineDeps) -> ListenerResult<Self> {
        validate_listener(&config).map_err(|source| ListenerError::InvalidConfig { source })?;
        let client = ConnectionClient::new(
            &config,
            deps.connector,
            Arc::new(EventBusObserver::new(deps.events.clone())),
        )?
        .with_throttle(deps.throttle)
        .with_metrics(deps.metrics.clone());

        Ok(Self {
            context: Arc::new(TaskContext {
                config,
                client: Arc::new(client),
                processor: deps.processor,
                settings: deps.settings,
                events: deps.events,
                metrics: deps.metrics,
            }),
            dispatcher: deps.dispatcher,
            timings: deps.timings,
            control: Arc::new(Control::new()),
            thread: Mutex::new(None),
        })
    }

    /// Listener identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.context.config.id
    }

    /// Configuration the engine runs with.
    #[must_use]
    pub fn config(&self) -> &Arc<ListenerConfig> {
        &self.context.config
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> EnginePhase {
        self.control.lock().phase
    }

    /// Reason the thread exited on its own, if it did.
    #[must_use]
    pub fn fatal_reason(&self) -> Option<String> {
        self.control.lock().fatal.clone()
    }

    /// Start the polling thread.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::AlreadyStarted`] on a second call and
    /// [`ListenerError::ThreadSpawn`] when the OS refuses the thread.
    pub fn start(&self) -> ListenerResult<()> {
        let mut state = self.control.lock();
        if state.phase != EnginePhase::Created {
            return Err(ListenerError::AlreadyStarted);
        }
        let mut worker = self.worker();
        let handle = thread::Builder::new()
            .name(format!("sftpoll-listener-{}", self.context.config.name))
            .spawn(move || worker.run())
            .map_err(|source| ListenerError::ThreadSpawn { source })?;
        state.phase = EnginePhase::Running;
        drop(state);
        *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Ask the thread to stop. Non-blocking and idempotent.
    pub fn stop(&self) {
        let mut state = self.control.lock();
        if state.stop_requested_at.is_none() {
            state.stop_requested_at = Some(Instant::now());
            debug!(listener_id = %self.id(), "stop requested");
        }
        state.phase = match state.phase {
            EnginePhase::Created => EnginePhase::Stopped,
            EnginePhase::Running => EnginePhase::Stopping,
            other => other,
        };
        drop(state);
        self.control.signal.notify_all();
    }

    /// Stop the thread and wait for it, up to the shutdown timeout measured
    /// from the first stop request. Returns whether the thread has exited.
    pub fn ensure_stopped(&self) -> bool {
        self.stop();
        let Some(handle) = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return true;
        };

        let state = self.control.lock();
        let requested = state.stop_requested_at.unwrap_or_else(Instant::now);
        let remaining = self
            .timings
            .shutdown_timeout
            .saturating_sub(requested.elapsed());
        let (state, _) = self
            .control
            .signal
            .wait_timeout_while(state, remaining, |state| !state.exited)
            .unwrap_or_else(PoisonError::into_inner);
        let exited = state.exited;
        drop(state);

        if exited {
            if handle.join().is_err() {
                warn!(listener_id = %self.id(), "polling thread panicked");
            }
        } else {
            warn!(
                listener_id = %self.id(),
                timeout_secs = self.timings.shutdown_timeout.as_secs(),
                "polling thread did not stop within the shutdown timeout"
            );
            *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }
        exited
    }

    /// Close the engine's connection. Idempotent.
    pub fn cleanup(&self) {
        self.context.client.close();
    }

    pub(crate) fn worker(&self) -> Worker {
        Worker {
            context: Arc::clone(&self.context),
            dispatcher: self.dispatcher.clone(),
            timings: self.timings,
            control: Arc::clone(&self.control),
            state: EngineState::default(),
        }
    }
}

impl Drop for PollingEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the polling thread.
pub(crate) struct Worker {
    context: Arc<TaskContext>,
    dispatcher: Dispatcher,
    timings: EngineTimings,
    control: Arc<Control>,
    pub(crate) state: EngineState,
}

impl Worker {
    fn run(&mut self) {
        let config = Arc::clone(&self.context.config);
        let span = listener_span(config.id, &config.name);
        let _entered = span.enter();

        self.context.metrics.engine_started();
        self.context.events.publish(Event::ListenerStarted {
            listener_id: config.id,
            name: config.name.clone(),
        });
        info!(directory = %config.directory, host = %config.hostname, "polling engine started");

        let mut fatal = None;
        while !self.control.stop_requested() {
            match self.run_iteration() {
                Step::Continue => {}
                Step::Sleep(duration) => self.control.sleep(duration),
                Step::Exit(reason) => {
                    fatal = Some(reason);
                    break;
                }
            }
        }

        self.release_claims();
        self.context.client.close();
        self.context.metrics.engine_stopped();
        if let Some(reason) = &fatal {
            self.context.events.publish(Event::ListenerStale {
                listener_id: config.id,
                reason: reason.clone(),
            });
        }
        self.context.events.publish(Event::ListenerStopped {
            listener_id: config.id,
        });
        info!(stale = fatal.is_some(), "polling engine stopped");
        self.control.mark_exited(fatal);
    }

    /// One pass: scan when idle, then dispatch at most one file.
    pub(crate) fn run_iteration(&mut self) -> Step {
        if self.state.needs_scan() {
            match claim_files(&self.context.client, &self.context.config) {
                Ok(files) => self.accept_claims(files),
                Err(ClaimError { claimed, source }) => {
                    self.accept_claims(claimed);
                    return self.on_failure(&ListenerError::from(source));
                }
            }
        }

        let Some(file) = self.state.next_file() else {
            return Step::Sleep(self.context.config.polling_interval);
        };

        match self.dispatcher.dispatch(&self.context, file) {
            Ok(()) => {
                self.state.record_success();
                Step::Continue
            }
            Err(ListenerError::PoolRejected { file, reason }) => {
                debug!(file = %file, reason = reason.label(), "worker pool rejected file; retrying later");
                self.context.metrics.inc_dispatch_rejection();
                self.context.events.publish(Event::FileDeferred {
                    listener_id: self.context.config.id,
                    file: file.clone(),
                });
                self.state.record_rejection(file);
                Step::Sleep(self.timings.policy.retry_delay)
            }
            Err(err) => self.on_failure(&err),
        }
    }

    fn accept_claims(&mut self, files: Vec<String>) {
        for file in &files {
            self.context.metrics.inc_file_claimed();
            self.context.events.publish(Event::FileClaimed {
                listener_id: self.context.config.id,
                file: file.clone(),
            });
        }
        if !files.is_empty() {
            debug!(count = files.len(), "claimed files");
        }
        self.state.enqueue(files);
    }

    /// Hand undispatched claims back to the directory so the next scan, by
    /// this listener or another, picks them up again.
    fn release_claims(&mut self) {
        let pending = self.state.drain();
        if pending.is_empty() {
            return;
        }
        let mut released = 0_usize;
        for file in &pending {
            match self
                .context
                .client
                .rename(&format!("{file}{PROCESSING_SUFFIX}"), file)
            {
                Ok(()) => released += 1,
                Err(err) => warn!(
                    file = %file,
                    error = %err,
                    detail = %err.describe(),
                    "failed to release claimed file"
                ),
            }
        }
        info!(released, pending = pending.len(), "released undispatched claims");
    }

    fn on_failure(&mut self, err: &ListenerError) -> Step {
        if err.is_fatal() {
            let reason = err.stale_reason();
            error!(error = %err, reason = %reason, "listener cannot continue; marking stale");
            return Step::Exit(reason);
        }

        let failures = self.state.record_failure();
        self.context.client.close();
        let delay = self.timings.policy.delay_after_failure(failures);
        let long = failures >= self.timings.policy.max_consecutive_errors;
        self.context
            .metrics
            .inc_backoff_sleep(if long { "long" } else { "short" });
        warn!(
            error = %err,
            detail = %describe(err),
            consecutive_errors = failures,
            delay_secs = delay.as_secs(),
            "polling iteration failed; backing off"
        );
        Step::Sleep(delay)
    }
}

fn describe(err: &ListenerError) -> String {
    match err {
        ListenerError::Client(client) => client.describe(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerPool;
    use crate::state::{BackoffPolicy, DEFAULT_SHUTDOWN_TIMEOUT};
    use sftpoll_config::StaticSecretResolver;
    use sftpoll_events::FileDisposition;
    use sftpoll_test_support::{
        FIXTURE_DIRECTORY, Gate, MemorySftp, RecordingProcessor, Reply, listener_config,
        listener_definition, wait_until,
    };
    use tokio::runtime::Runtime;

    const POLICY: BackoffPolicy = BackoffPolicy {
        retry_delay: Duration::from_secs(5),
        max_consecutive_errors: 5,
        long_backoff: Duration::from_secs(60),
    };

    struct Fixture {
        _runtime: Runtime,
        server: MemorySftp,
        events: EventBus,
        metrics: Metrics,
        deps: EngineDeps,
    }

    fn fixture(reply: Reply, pool_limit: usize) -> Fixture {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("test runtime");
        let server = MemorySftp::with_directory(FIXTURE_DIRECTORY);
        let events = EventBus::with_capacity(128);
        let metrics = Metrics::new().expect("metrics");
        let deps = EngineDeps {
            connector: Arc::new(server.clone()),
            processor: Arc::new(RecordingProcessor::new(reply)),
            dispatcher: Dispatcher::new(WorkerPool::new(runtime.handle().clone(), pool_limit)),
            events: events.clone(),
            metrics: metrics.clone(),
            settings: SharedSettings::default(),
            timings: EngineTimings {
                policy: POLICY,
                shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            },
            throttle: NotificationThrottle::new(Duration::from_secs(60)),
        };
        Fixture {
            _runtime: runtime,
            server,
            events,
            metrics,
            deps,
        }
    }

    fn engine(fixture: &Fixture) -> PollingEngine {
        PollingEngine::new(
            Arc::new(listener_config(Uuid::new_v4(), 1)),
            fixture.deps.clone(),
        )
        .expect("valid fixture listener")
    }

    #[test]
    fn repeated_failures_switch_to_long_backoff_and_success_resets() {
        let fixture = fixture(Reply::Echo, 5);
        fixture.server.fail_next_connects(6);
        let engine = engine(&fixture);
        let mut worker = engine.worker();

        let steps: Vec<_> = (0..6).map(|_| worker.run_iteration()).collect();
        assert!(steps[..4].iter().all(|step| *step == Step::Sleep(POLICY.retry_delay)));
        assert!(steps[4..].iter().all(|step| *step == Step::Sleep(POLICY.long_backoff)));
        assert_eq!(worker.state.consecutive_errors(), 6);
        assert_eq!(fixture.server.connect_targets().len(), 6);

        fixture.server.put(FIXTURE_DIRECTORY, "a.xml", "<a/>");
        assert_eq!(worker.run_iteration(), Step::Continue);
        assert_eq!(worker.state.consecutive_errors(), 0);
    }

    #[test]
    fn rejected_file_is_retried_before_rescanning() {
        let gate = Gate::default();
        let fixture = fixture(Reply::Blocked(gate.clone(), Duration::from_secs(10)), 1);
        fixture.server.put(FIXTURE_DIRECTORY, "a.xml", "<a/>");
        fixture.server.put(FIXTURE_DIRECTORY, "b.xml", "<b/>");
        let engine = engine(&fixture);
        let mut worker = engine.worker();

        assert_eq!(worker.run_iteration(), Step::Continue);
        assert_eq!(worker.run_iteration(), Step::Sleep(POLICY.retry_delay));
        assert_eq!(worker.state.pending_retry(), Some("b.xml"));
        assert_eq!(worker.state.consecutive_errors(), 0);

        fixture.server.put(FIXTURE_DIRECTORY, "c.xml", "<c/>");
        assert_eq!(worker.run_iteration(), Step::Sleep(POLICY.retry_delay));
        assert!(fixture.server.names(FIXTURE_DIRECTORY).contains(&"c.xml".to_string()));

        gate.open();
        let pool = fixture.deps.dispatcher.pool().clone();
        assert!(wait_until(Duration::from_secs(5), || pool.active() == 0));
        assert_eq!(worker.run_iteration(), Step::Continue);
        assert_eq!(worker.state.pending_retry(), None);
        assert!(wait_until(Duration::from_secs(5), || pool.active() == 0));
        assert_eq!(worker.run_iteration(), Step::Continue);
        assert!(
            fixture
                .server
                .names(FIXTURE_DIRECTORY)
                .iter()
                .any(|name| name.starts_with("c.xml."))
        );
        assert_eq!(fixture.metrics.snapshot().dispatch_rejections_total, 2);
    }

    #[test]
    fn claims_survive_a_connect_failure_mid_scan() {
        let fixture = fixture(Reply::Echo, 5);
        fixture.server.put(FIXTURE_DIRECTORY, "a.xml", "<a/>");
        fixture.server.put(FIXTURE_DIRECTORY, "b.xml", "<b/>");
        fixture.server.go_offline_after_rename("a.xml");
        let engine = engine(&fixture);
        let mut worker = engine.worker();

        assert_eq!(worker.run_iteration(), Step::Sleep(POLICY.retry_delay));
        assert_eq!(worker.state.consecutive_errors(), 1);
        assert!(!worker.state.needs_scan());

        fixture.server.fail_next_connects(0);
        assert_eq!(worker.run_iteration(), Step::Continue);
        assert!(wait_until(Duration::from_secs(5), || {
            fixture
                .server
                .names(FIXTURE_DIRECTORY)
                .contains(&"a.xml.processed".to_string())
        }));
    }

    #[test]
    fn stopping_releases_undispatched_claims() {
        let gate = Gate::default();
        let fixture = fixture(Reply::Blocked(gate.clone(), Duration::from_secs(10)), 1);
        for name in ["a.xml", "b.xml", "c.xml"] {
            fixture.server.put(FIXTURE_DIRECTORY, name, "<x/>");
        }
        let engine = engine(&fixture);
        engine.start().expect("engine starts");
        assert!(wait_until(Duration::from_secs(5), || {
            fixture.metrics.snapshot().dispatch_rejections_total > 0
        }));

        assert!(engine.ensure_stopped());
        gate.open();
        let pool = fixture.deps.dispatcher.pool().clone();
        assert!(wait_until(Duration::from_secs(5), || pool.active() == 0));

        let names = fixture.server.names(FIXTURE_DIRECTORY);
        assert!(
            !names.iter().any(|name| name.ends_with(PROCESSING_SUFFIX)),
            "claims left behind: {names:?}"
        );
        assert!(names.contains(&"a.xml.processed".to_string()));
        assert!(names.contains(&"b.xml".to_string()));
        assert!(names.contains(&"c.xml".to_string()));
    }

    #[test]
    fn missing_directory_is_fatal() {
        let fixture = fixture(Reply::Echo, 1);
        fixture.server.remove_dir(FIXTURE_DIRECTORY);
        let engine = engine(&fixture);
        let mut worker = engine.worker();
        assert_eq!(
            worker.run_iteration(),
            Step::Exit("directory_not_found".to_string())
        );
        assert_eq!(worker.state.consecutive_errors(), 0);
    }

    #[test]
    fn idle_scan_sleeps_for_the_polling_interval() {
        let fixture = fixture(Reply::Echo, 1);
        let engine = engine(&fixture);
        assert_eq!(
            engine.worker().run_iteration(),
            Step::Sleep(Duration::from_secs(1))
        );
    }

    #[test]
    fn engine_thread_processes_and_stops_promptly() {
        let fixture = fixture(Reply::Echo, 5);
        fixture.server.put(FIXTURE_DIRECTORY, "invoice1.xml", "<invoice>1</invoice>");
        let engine = engine(&fixture);
        engine.start().expect("engine starts");
        assert_eq!(engine.phase(), EnginePhase::Running);
        assert!(matches!(engine.start(), Err(ListenerError::AlreadyStarted)));

        assert!(wait_until(Duration::from_secs(5), || {
            fixture
                .events
                .recent()
                .iter()
                .any(|envelope| matches!(
                    envelope.event,
                    Event::FileCompleted { disposition: FileDisposition::Processed, replied: true, .. }
                ))
        }));
        assert_eq!(fixture.metrics.snapshot().running_engines, 1);

        let requested = Instant::now();
        assert!(engine.ensure_stopped());
        assert!(requested.elapsed() < DEFAULT_SHUTDOWN_TIMEOUT);
        assert_eq!(engine.phase(), EnginePhase::Stopped);
        assert_eq!(engine.fatal_reason(), None);
        assert_eq!(fixture.metrics.snapshot().running_engines, 0);
        assert!(engine.ensure_stopped());
        engine.cleanup();
    }

    #[test]
    fn engine_thread_exits_stale_when_directory_is_missing() {
        let fixture = fixture(Reply::Echo, 1);
        fixture.server.remove_dir(FIXTURE_DIRECTORY);
        let engine = engine(&fixture);
        engine.start().expect("engine starts");
        assert!(wait_until(Duration::from_secs(5), || {
            engine.phase() == EnginePhase::Stopped
        }));
        assert_eq!(engine.fatal_reason().as_deref(), Some("directory_not_found"));
        assert!(fixture.events.recent().iter().any(|envelope| matches!(
            &envelope.event,
            Event::ListenerStale { reason, .. } if reason == "directory_not_found"
        )));
        assert!(engine.ensure_stopped());
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let fixture = fixture(Reply::Echo, 1);
        let mut definition = listener_definition(Uuid::new_v4(), 1);
        definition.hostname = "  ".to_string();
        let config = ListenerConfig::resolve(definition, &StaticSecretResolver::default());
        let err = PollingEngine::new(Arc::new(config), fixture.deps.clone())
            .err()
            .expect("blank host is invalid");
        assert!(err.is_fatal());
        assert_eq!(err.stale_reason(), "invalid_hostname");
    }

    #[test]
    fn stopping_an_unstarted_engine_is_immediate() {
        let fixture = fixture(Reply::Echo, 1);
        let engine = engine(&fixture);
        engine.stop();
        assert_eq!(engine.phase(), EnginePhase::Stopped);
        assert!(engine.ensure_stopped());
        assert!(matches!(engine.start(), Err(ListenerError::AlreadyStarted)));
    }
}
