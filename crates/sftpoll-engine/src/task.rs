//! Processing of one claimed file on a worker thread.
//!
//! # Design
//!
//! - The download runs on its own thread and streams into a bounded pipe that
//!   the processor reads as the request body.
//! - Housekeeping always runs once a reply has been decided, even when the
//!   processor failed or panicked.
//! - Every failure after claiming is logged; nothing is propagated back to the
//!   polling engine.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use sftpoll_config::{ListenerConfig, SharedSettings};
use sftpoll_core::{
    MessageProcessor, PROCESSED_SUFFIX, PROCESSING_SUFFIX, ProcessingOutcome, ProcessingRequest,
    ProcessingStatus, RESPONSE_SUFFIX, ResponsePayload,
};
use sftpoll_events::{Event, EventBus, FileDisposition};
use sftpoll_telemetry::Metrics;
use sftpoll_transport::ConnectionClient;
use tracing::{debug, info, warn};

use crate::fault::{GENERIC_FAULT_MESSAGE, SERVER_FAULT, fault_payload, size_limit_fault};
use crate::pipe::{DEFAULT_PIPE_DEPTH, pipe};

/// Everything a file task needs, shared by all tasks of one listener.
pub struct TaskContext {
    /// Listener the tasks belong to.
    pub config: Arc<ListenerConfig>,
    /// Client shared with the polling engine.
    pub client: Arc<ConnectionClient>,
    /// Downstream message processor.
    pub processor: Arc<dyn MessageProcessor>,
    /// Module-wide limits, read once per task.
    pub settings: SharedSettings,
    /// Event sink.
    pub events: EventBus,
    /// Metrics registry.
    pub metrics: Metrics,
}

/// How the reply for a file was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// The processor produced reply content.
    Replied,
    /// No reply: stealth failure or success without content.
    Silent,
    /// A fault reply was synthesized.
    Fault,
    /// The file exceeded the size limit and was never processed.
    Rejected,
}

impl ReplyKind {
    /// Label used for metrics.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Replied => "replied",
            Self::Silent => "silent",
            Self::Fault => "fault",
            Self::Rejected => "rejected",
        }
    }
}

/// Summary of a finished task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    /// Original file name.
    pub file: String,
    /// How the reply was decided.
    pub reply: ReplyKind,
    /// Final state of the claimed file.
    pub disposition: FileDisposition,
    /// Whether a `.response` file was written.
    pub uploaded: bool,
}

/// One claimed file waiting to be processed.
pub struct FileTask {
    context: Arc<TaskContext>,
    file: String,
}

impl FileTask {
    /// Task for `file`, which must already carry its `.processing` marker.
    #[must_use]
    pub const fn new(context: Arc<TaskContext>, file: String) -> Self {
        Self { context, file }
    }

    /// Process the file, clean up its marker and upload any reply.
    pub fn run(self) -> TaskReport {
        let context = &self.context;
        let processing = format!("{}{PROCESSING_SUFFIX}", self.file);

        let (reply, payload) = self.decide_reply(&processing);
        let disposition = self.housekeep(&processing);

        let mut uploaded = false;
        if let Some(payload) = payload.as_ref().filter(|_| context.config.enable_responses) {
            uploaded = self.upload_reply(payload);
        }

        context.metrics.inc_file_processed(reply.label());
        context.events.publish(Event::FileCompleted {
            listener_id: context.config.id,
            file: self.file.clone(),
            disposition,
            replied: payload.is_some(),
        });
        info!(
            listener_id = %context.config.id,
            file = %self.file,
            reply = reply.label(),
            ?disposition,
            uploaded,
            "file task finished"
        );
        TaskReport {
            file: self.file,
            reply,
            disposition,
            uploaded,
        }
    }

    fn decide_reply(&self, processing: &str) -> (ReplyKind, Option<ResponsePayload>) {
        let context = &self.context;
        let xml = context.config.is_xml();
        let size = match context.client.file_size(processing) {
            Ok(size) => size,
            Err(err) => {
                warn!(
                    listener_id = %context.config.id,
                    file = %self.file,
                    error = %err.describe(),
                    "failed to read size of claimed file"
                );
                return (
                    ReplyKind::Fault,
                    Some(fault_payload(SERVER_FAULT, GENERIC_FAULT_MESSAGE, xml)),
                );
            }
        };

        let settings = context.settings.current();
        let limit = settings.max_message_bytes;
        if limit > 0 && size > limit {
            warn!(
                listener_id = %context.config.id,
                file = %self.file,
                size,
                limit,
                "claimed file exceeds the message size limit"
            );
            return (ReplyKind::Rejected, Some(size_limit_fault(size, limit, xml)));
        }

        match self.process(processing, size, settings.download_wait) {
            Some(outcome) => reply_for(outcome, xml),
            None => (
                ReplyKind::Fault,
                Some(fault_payload(SERVER_FAULT, GENERIC_FAULT_MESSAGE, xml)),
            ),
        }
    }

    /// Run the download and the processor concurrently.
    fn process(&self, processing: &str, size: u64, download_wait: Duration) -> Option<ProcessingOutcome> {
        let context = &self.context;
        let (writer, reader) = pipe(DEFAULT_PIPE_DEPTH);
        let (done_tx, done_rx) = mpsc::channel();
        let client = Arc::clone(&context.client);
        let remote = processing.to_string();
        let spawned = thread::Builder::new()
            .name("sftpoll-download".to_string())
            .spawn(move || {
                let mut writer = writer;
                let result = client.download(&remote, &mut writer);
                match &result {
                    Ok(_) => drop(writer),
                    Err(err) => writer.abort(err.describe()),
                }
                let _ = done_tx.send(result.map_err(|err| err.describe()));
            });
        if let Err(err) = spawned {
            warn!(
                listener_id = %context.config.id,
                file = %self.file,
                error = %err,
                "failed to spawn download thread"
            );
            return None;
        }

        let request = ProcessingRequest {
            listener_id: context.config.id,
            listener_name: context.config.name.clone(),
            file_name: self.file.clone(),
            content_type: context.config.content_type.clone(),
            content_length: Some(size),
            hardwired_service: context.config.hardwired_service,
            body: Box::new(reader),
        };
        let processor = Arc::clone(&context.processor);
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || processor.process(request)));

        match done_rx.recv_timeout(download_wait) {
            Ok(Ok(bytes)) => debug!(file = %self.file, bytes, "download finished"),
            Ok(Err(message)) => warn!(
                listener_id = %context.config.id,
                file = %self.file,
                error = %message,
                "download failed"
            ),
            Err(RecvTimeoutError::Timeout) => warn!(
                listener_id = %context.config.id,
                file = %self.file,
                wait_ms = u64::try_from(download_wait.as_millis()).unwrap_or(u64::MAX),
                "download still running after processing finished"
            ),
            Err(RecvTimeoutError::Disconnected) => warn!(
                listener_id = %context.config.id,
                file = %self.file,
                "download thread exited without reporting"
            ),
        }

        match outcome {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(err)) => {
                warn!(
                    listener_id = %context.config.id,
                    file = %self.file,
                    error = %format!("{err:#}"),
                    "message processing failed"
                );
                None
            }
            Err(_) => {
                warn!(
                    listener_id = %context.config.id,
                    file = %self.file,
                    "message processor panicked"
                );
                None
            }
        }
    }

    fn housekeep(&self, processing: &str) -> FileDisposition {
        let context = &self.context;
        let (result, done) = if context.config.delete_on_receive {
            (context.client.remove(processing), FileDisposition::Deleted)
        } else {
            let processed = format!("{}{PROCESSED_SUFFIX}", self.file);
            (
                context.client.rename(processing, &processed),
                FileDisposition::Processed,
            )
        };
        match result {
            Ok(()) => done,
            Err(err) => {
                warn!(
                    listener_id = %context.config.id,
                    file = %self.file,
                    error = %err.describe(),
                    "failed to clean up claimed file; it stays claimed"
                );
                FileDisposition::Stranded
            }
        }
    }

    fn upload_reply(&self, payload: &ResponsePayload) -> bool {
        let context = &self.context;
        let target = format!("{}{RESPONSE_SUFFIX}", self.file);
        match context.client.upload(&target, &payload.body) {
            Ok(()) => true,
            Err(err) => {
                let message = err.describe();
                warn!(
                    listener_id = %context.config.id,
                    file = %self.file,
                    error = %message,
                    "failed to upload response"
                );
                context.events.publish(Event::ResponseUploadFailed {
                    listener_id: context.config.id,
                    file: self.file.clone(),
                    message,
                });
                false
            }
        }
    }
}

fn reply_for(outcome: ProcessingOutcome, xml: bool) -> (ReplyKind, Option<ResponsePayload>) {
    if let Some(response) = outcome.response {
        return (ReplyKind::Replied, Some(response));
    }
    if outcome.status == ProcessingStatus::Success || outcome.stealth {
        return (ReplyKind::Silent, None);
    }
    let code = outcome.fault_code.as_deref().unwrap_or(SERVER_FAULT);
    let message = outcome
        .fault_message
        .as_deref()
        .unwrap_or(GENERIC_FAULT_MESSAGE);
    (ReplyKind::Fault, Some(fault_payload(code, message, xml)))
}
