//! Message processors that record what they were asked to process.

use std::io::Read;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, anyhow};
use sftpoll_core::{MessageProcessor, ProcessingOutcome, ProcessingRequest, ResponsePayload};
use uuid::Uuid;

use crate::fixtures::Gate;

/// Snapshot of one processed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Listener that dispatched the request.
    pub listener_id: Uuid,
    /// Original file name.
    pub file_name: String,
    /// Content type passed along.
    pub content_type: String,
    /// Declared size.
    pub content_length: Option<u64>,
    /// Hardwired destination.
    pub hardwired_service: Option<Uuid>,
    /// Body bytes read from the stream.
    pub body: Vec<u8>,
}

/// How a [`RecordingProcessor`] answers.
#[derive(Clone)]
pub enum Reply {
    /// Reply with the request body as XML.
    Echo,
    /// Return this outcome after draining the body.
    Outcome(ProcessingOutcome),
    /// Drain the body then fail with this message.
    Error(String),
    /// Drain the body then panic with this message.
    Panic(String),
    /// Wait for the gate before echoing; fails if it stays closed past the timeout.
    Blocked(Gate, Duration),
    /// Return without reading the body.
    IgnoreBody(ProcessingOutcome),
}

/// Processor that records every request and answers according to [`Reply`].
#[derive(Clone)]
pub struct RecordingProcessor {
    reply: Reply,
    calls: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl RecordingProcessor {
    /// Processor with the given reply strategy.
    #[must_use]
    pub fn new(reply: Reply) -> Self {
        Self {
            reply,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Echoing processor.
    #[must_use]
    pub fn echo() -> Self {
        Self::new(Reply::Echo)
    }

    /// Requests processed so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests processed so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn record(&self, request: &ProcessingRequest, body: Vec<u8>) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                listener_id: request.listener_id,
                file_name: request.file_name.clone(),
                content_type: request.content_type.clone(),
                content_length: request.content_length,
                hardwired_service: request.hardwired_service,
                body,
            });
    }
}

impl MessageProcessor for RecordingProcessor {
    fn process(&self, mut request: ProcessingRequest) -> anyhow::Result<ProcessingOutcome> {
        if let Reply::IgnoreBody(outcome) = &self.reply {
            self.record(&request, Vec::new());
            return Ok(outcome.clone());
        }

        let mut body = Vec::new();
        request
            .body
            .read_to_end(&mut body)
            .context("failed to read request body")?;
        self.record(&request, body.clone());

        match &self.reply {
            Reply::Echo => Ok(ProcessingOutcome::success(Some(ResponsePayload::xml(body)))),
            Reply::Outcome(outcome) | Reply::IgnoreBody(outcome) => Ok(outcome.clone()),
            Reply::Error(message) => Err(anyhow!(message.clone())),
            Reply::Panic(message) => panic!("{message}"),
            Reply::Blocked(gate, timeout) => {
                if gate.wait(*timeout) {
                    Ok(ProcessingOutcome::success(Some(ResponsePayload::xml(body))))
                } else {
                    Err(anyhow!("gate stayed closed"))
                }
            }
        }
    }
}
