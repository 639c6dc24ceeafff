//! Bounded worker pool shared by every listener in the process.
//!
//! Tasks run on the runtime's blocking threads. A semaphore caps how many run
//! at once; submission never queues, so a full pool rejects immediately and
//! the caller decides when to retry.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::debug;

use crate::error::RejectReason;

/// Fixed-size, non-queuing pool of blocking workers.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    limit: usize,
}

impl WorkerPool {
    /// Pool running at most `limit` jobs on `handle`'s blocking threads.
    #[must_use]
    pub fn new(handle: Handle, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Run `job` if a worker is free.
    ///
    /// # Errors
    ///
    /// Returns [`RejectReason::Full`] when every worker is busy and
    /// [`RejectReason::ShutDown`] after [`WorkerPool::shutdown`].
    pub fn try_submit<F>(&self, job: F) -> Result<(), RejectReason>
    where
        F: FnOnce() + Send + 'static,
    {
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => return Err(RejectReason::Full),
            Err(TryAcquireError::Closed) => return Err(RejectReason::ShutDown),
        };
        self.handle.spawn_blocking(move || {
            let _permit = permit;
            job();
        });
        Ok(())
    }

    /// Jobs currently running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.limit.saturating_sub(self.permits.available_permits())
    }

    /// Maximum concurrent jobs.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Refuse new jobs. Running jobs finish normally.
    pub fn shutdown(&self) {
        if !self.permits.is_closed() {
            debug!(active = self.active(), "worker pool shutting down");
            self.permits.close();
        }
    }

    /// Whether [`WorkerPool::shutdown`] was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.permits.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use sftpoll_test_support::{Gate, wait_until};

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("test runtime")
    }

    #[test]
    fn rejects_when_full_and_recovers() {
        let runtime = runtime();
        let pool = WorkerPool::new(runtime.handle().clone(), 2);
        let gate = Gate::default();
        for _ in 0..2 {
            let gate = gate.clone();
            pool.try_submit(move || {
                gate.wait(Duration::from_secs(5));
            })
            .expect("slot available");
        }
        assert_eq!(pool.active(), 2);
        assert_eq!(pool.try_submit(|| {}), Err(RejectReason::Full));

        gate.open();
        assert!(wait_until(Duration::from_secs(5), || pool.active() == 0));
        let (done_tx, done_rx) = mpsc::channel();
        pool.try_submit(move || {
            let _ = done_tx.send(());
        })
        .expect("slot freed");
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn shutdown_rejects_new_work() {
        let runtime = runtime();
        let pool = WorkerPool::new(runtime.handle().clone(), 1);
        pool.shutdown();
        assert!(pool.is_shut_down());
        assert_eq!(pool.try_submit(|| {}), Err(RejectReason::ShutDown));
    }

    #[test]
    fn panicking_job_releases_its_slot() {
        let runtime = runtime();
        let pool = WorkerPool::new(runtime.handle().clone(), 1);
        pool.try_submit(|| panic!("job failed")).expect("slot available");
        assert!(wait_until(Duration::from_secs(5), || pool.active() == 0));
    }
}
