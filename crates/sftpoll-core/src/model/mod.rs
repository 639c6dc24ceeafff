//! Data shared between the transport, the engine and the message processor.

use std::fmt;
use std::io::Read;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sftpoll_config::{Credential, ListenerConfig};
use uuid::Uuid;

/// Suffix marking a file claimed by an engine.
pub const PROCESSING_SUFFIX: &str = ".processing";
/// Suffix marking a file whose processing completed.
pub const PROCESSED_SUFFIX: &str = ".processed";
/// Suffix of uploaded reply artifacts.
pub const RESPONSE_SUFFIX: &str = ".response";

/// Default timeout applied while establishing a session.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Kind of remote directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symlink, device or anything else.
    Other,
}

/// One entry returned by a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// File name relative to the listed directory.
    pub name: String,
    /// Entry kind.
    pub kind: EntryKind,
    /// Size in bytes when the server reports it.
    pub size: Option<u64>,
}

impl RemoteEntry {
    /// Regular file entry.
    #[must_use]
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            size: Some(size),
        }
    }

    /// Directory entry.
    #[must_use]
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            size: None,
        }
    }

    /// Whether the entry is a regular file.
    #[must_use]
    pub const fn is_file(&self) -> bool {
        matches!(self.kind, EntryKind::File)
    }
}

/// Whether `name` already carries one of the marker suffixes.
#[must_use]
pub fn has_marker_suffix(name: &str) -> bool {
    [PROCESSING_SUFFIX, PROCESSED_SUFFIX, RESPONSE_SUFFIX]
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

/// Everything a connector needs to open a session.
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    /// Remote host.
    pub host: String,
    /// Remote SSH port.
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Resolved credential.
    pub credential: Credential,
    /// Expected host key fingerprint.
    pub host_key_fingerprint: Option<String>,
    /// Upper bound on connection establishment.
    pub connect_timeout: Duration,
}

impl ConnectTarget {
    /// Build a target from a validated listener configuration.
    ///
    /// Returns `None` when the configured port is out of range.
    #[must_use]
    pub fn from_listener(config: &ListenerConfig) -> Option<Self> {
        Some(Self {
            host: config.hostname.clone(),
            port: config.port_u16()?,
            username: config.username.clone(),
            credential: config.credential.clone(),
            host_key_fingerprint: config.host_key_fingerprint.clone(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// `host:port` form used in logs.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Request handed to the message processor for one claimed file.
pub struct ProcessingRequest {
    /// Listener that claimed the file.
    pub listener_id: Uuid,
    /// Listener display name.
    pub listener_name: String,
    /// Original (unclaimed) file name.
    pub file_name: String,
    /// Content type configured on the listener.
    pub content_type: String,
    /// Size of the claimed file as reported by the server.
    pub content_length: Option<u64>,
    /// Destination service, when the listener is hardwired.
    pub hardwired_service: Option<Uuid>,
    /// Streaming request body fed by the concurrent download.
    pub body: Box<dyn Read + Send>,
}

impl fmt::Debug for ProcessingRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ProcessingRequest")
            .field("listener_id", &self.listener_id)
            .field("listener_name", &self.listener_name)
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("hardwired_service", &self.hardwired_service)
            .finish_non_exhaustive()
    }
}

/// Final status of a processed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// The request was routed and handled.
    Success,
    /// Routing or policy evaluation failed.
    Failed,
}

/// How the reply payload should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// XML document.
    Xml,
    /// Opaque bytes.
    Raw,
}

/// Reply content produced by processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePayload {
    /// Reply bytes.
    pub body: Vec<u8>,
    /// Content interpretation.
    pub kind: PayloadKind,
}

impl ResponsePayload {
    /// XML reply.
    #[must_use]
    pub fn xml(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            kind: PayloadKind::Xml,
        }
    }

    /// Opaque reply.
    #[must_use]
    pub fn raw(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            kind: PayloadKind::Raw,
        }
    }
}

/// Result reported by the message processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingOutcome {
    /// Final status.
    pub status: ProcessingStatus,
    /// Reply content, when any was produced.
    pub response: Option<ResponsePayload>,
    /// Suppress fault replies for failed requests.
    pub stealth: bool,
    /// Fault code reported by the policy that failed.
    pub fault_code: Option<String>,
    /// Fault detail reported by the policy that failed.
    pub fault_message: Option<String>,
}

impl ProcessingOutcome {
    /// Successful outcome with optional reply content.
    #[must_use]
    pub const fn success(response: Option<ResponsePayload>) -> Self {
        Self {
            status: ProcessingStatus::Success,
            response,
            stealth: false,
            fault_code: None,
            fault_message: None,
        }
    }

    /// Failed outcome without reply content.
    #[must_use]
    pub fn failed(code: Option<&str>, message: Option<&str>) -> Self {
        Self {
            status: ProcessingStatus::Failed,
            response: None,
            stealth: false,
            fault_code: code.map(str::to_string),
            fault_message: message.map(str::to_string),
        }
    }

    /// Mark the outcome as stealth.
    #[must_use]
    pub const fn stealthy(mut self) -> Self {
        self.stealth = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_suffixes_are_detected() {
        assert!(has_marker_suffix("a.xml.processing"));
        assert!(has_marker_suffix("a.xml.processed"));
        assert!(has_marker_suffix("a.xml.response"));
        assert!(!has_marker_suffix("a.xml"));
        assert!(!has_marker_suffix("processing"));
    }

    #[test]
    fn outcome_builders() {
        let failed = ProcessingOutcome::failed(Some("Client"), None).stealthy();
        assert_eq!(failed.status, ProcessingStatus::Failed);
        assert!(failed.stealth);
        assert_eq!(failed.fault_code.as_deref(), Some("Client"));

        let ok = ProcessingOutcome::success(Some(ResponsePayload::xml("<ok/>")));
        assert_eq!(ok.response.map(|payload| payload.kind), Some(PayloadKind::Xml));
    }

    #[test]
    fn request_debug_skips_body() {
        let request = ProcessingRequest {
            listener_id: Uuid::nil(),
            listener_name: "inbound".to_string(),
            file_name: "a.xml".to_string(),
            content_type: "text/xml".to_string(),
            content_length: Some(3),
            hardwired_service: None,
            body: Box::new(std::io::empty()),
        };
        let rendered = format!("{request:?}");
        assert!(rendered.contains("a.xml"));
        assert!(!rendered.contains("body"));
    }
}
