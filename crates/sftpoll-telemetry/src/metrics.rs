//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Counters are labelled by outcome or kind, never by listener id, to keep
//!   cardinality bounded.

use std::sync::Arc;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared by engines and workers.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    files_claimed_total: IntCounter,
    files_processed_total: IntCounterVec,
    dispatch_rejections_total: IntCounter,
    connect_failures_total: IntCounterVec,
    backoff_sleeps_total: IntCounterVec,
    running_engines: IntGauge,
}

/// Snapshot of selected gauges and counters for status reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Engines currently polling.
    pub running_engines: i64,
    /// Files renamed to `.processing`.
    pub files_claimed_total: u64,
    /// Files dispatched back to the queue because the pool was full.
    pub dispatch_rejections_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any collector cannot be built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let files_claimed_total = IntCounter::with_opts(Opts::new(
            "sftpoll_files_claimed_total",
            "Remote files renamed to their processing marker",
        ))
        .map_err(|source| collector("sftpoll_files_claimed_total", source))?;
        let files_processed_total = IntCounterVec::new(
            Opts::new(
                "sftpoll_files_processed_total",
                "File tasks completed by outcome",
            ),
            &["outcome"],
        )
        .map_err(|source| collector("sftpoll_files_processed_total", source))?;
        let dispatch_rejections_total = IntCounter::with_opts(Opts::new(
            "sftpoll_dispatch_rejections_total",
            "Dispatch attempts rejected by a saturated worker pool",
        ))
        .map_err(|source| collector("sftpoll_dispatch_rejections_total", source))?;
        let connect_failures_total = IntCounterVec::new(
            Opts::new(
                "sftpoll_connect_failures_total",
                "Session establishment failures by kind",
            ),
            &["kind"],
        )
        .map_err(|source| collector("sftpoll_connect_failures_total", source))?;
        let backoff_sleeps_total = IntCounterVec::new(
            Opts::new(
                "sftpoll_backoff_sleeps_total",
                "Engine sleeps after failed iterations by length",
            ),
            &["length"],
        )
        .map_err(|source| collector("sftpoll_backoff_sleeps_total", source))?;
        let running_engines = IntGauge::with_opts(Opts::new(
            "sftpoll_running_engines",
            "Polling engine threads currently alive",
        ))
        .map_err(|source| collector("sftpoll_running_engines", source))?;

        register(&registry, "sftpoll_files_claimed_total", &files_claimed_total)?;
        register(
            &registry,
            "sftpoll_files_processed_total",
            &files_processed_total,
        )?;
        register(
            &registry,
            "sftpoll_dispatch_rejections_total",
            &dispatch_rejections_total,
        )?;
        register(
            &registry,
            "sftpoll_connect_failures_total",
            &connect_failures_total,
        )?;
        register(&registry, "sftpoll_backoff_sleeps_total", &backoff_sleeps_total)?;
        register(&registry, "sftpoll_running_engines", &running_engines)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                files_claimed_total,
                files_processed_total,
                dispatch_rejections_total,
                connect_failures_total,
                backoff_sleeps_total,
                running_engines,
            }),
        })
    }

    /// Count a claimed file.
    pub fn inc_file_claimed(&self) {
        self.inner.files_claimed_total.inc();
    }

    /// Count a finished file task (`replied`, `silent`, `fault`, `rejected`).
    pub fn inc_file_processed(&self, outcome: &str) {
        self.inner
            .files_processed_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Count a dispatch rejected by the worker pool.
    pub fn inc_dispatch_rejection(&self) {
        self.inner.dispatch_rejections_total.inc();
    }

    /// Count a failed connection attempt.
    pub fn inc_connect_failure(&self, kind: &str) {
        self.inner
            .connect_failures_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Count an engine backoff sleep (`short` or `long`).
    pub fn inc_backoff_sleep(&self, length: &str) {
        self.inner
            .backoff_sleeps_total
            .with_label_values(&[length])
            .inc();
    }

    /// Mark an engine thread as started.
    pub fn engine_started(&self) {
        self.inner.running_engines.inc();
    }

    /// Mark an engine thread as exited.
    pub fn engine_stopped(&self) {
        self.inner.running_engines.dec();
    }

    /// Render the registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or produces invalid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Point-in-time snapshot of the headline gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            running_engines: self.inner.running_engines.get(),
            files_claimed_total: self.inner.files_claimed_total.get(),
            dispatch_rejections_total: self.inner.dispatch_rejections_total.get(),
        }
    }
}

const fn collector(name: &'static str, source: prometheus::Error) -> TelemetryError {
    TelemetryError::MetricsCollector { name, source }
}

fn register<C>(registry: &Registry, name: &'static str, metric: &C) -> Result<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(metric.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}
