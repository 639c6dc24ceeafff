//! Hand-off of claimed files from polling engines to the worker pool.

use std::sync::Arc;

use sftpoll_telemetry::file_span;
use tracing::debug;

use crate::error::{ListenerError, ListenerResult};
use crate::pool::WorkerPool;
use crate::task::{FileTask, TaskContext};

/// Process-wide dispatcher shared by every polling engine.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pool: WorkerPool,
}

impl Dispatcher {
    /// Dispatcher submitting to `pool`.
    #[must_use]
    pub const fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    /// Submit `file` for processing.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::PoolRejected`] when no worker is available.
    pub fn dispatch(&self, context: &Arc<TaskContext>, file: String) -> ListenerResult<()> {
        let span = file_span(context.config.id, &file);
        let task = FileTask::new(Arc::clone(context), file.clone());
        self.pool
            .try_submit(move || {
                let _entered = span.entered();
                task.run();
            })
            .map_err(|reason| ListenerError::PoolRejected { file, reason })?;
        debug!(
            listener_id = %context.config.id,
            active = self.pool.active(),
            "file task dispatched"
        );
        Ok(())
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Stop accepting work.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}
