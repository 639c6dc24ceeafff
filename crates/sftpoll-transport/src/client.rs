//! Lock-guarded wrapper around one SFTP session.
//!
//! # Design
//! - Every operation funnels through one mutex, so the engine's scan and the
//!   worker tasks' transfers never interleave on the shared session.
//! - The session is (re)established lazily inside the lock; a fresh session
//!   always enters the configured directory before use.
//! - Connect notifications pass through a [`NotificationThrottle`].
//! - `close` never waits on the lock: while a transfer holds the session the
//!   close is recorded and applied by the holder once its operation ends.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use sftpoll_config::ListenerConfig;
use sftpoll_core::{ConnectTarget, RemoteEntry, SessionConnector, SessionResult, SftpSession};
use sftpoll_telemetry::Metrics;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ClientError, ClientResult, ConnectError, ConnectErrorKind};
use crate::observer::ConnectionObserver;
use crate::throttle::{NotificationKind, NotificationThrottle};

type SessionSlot = Option<Box<dyn SftpSession>>;

/// Serialized access to one listener's SFTP session.
pub struct ConnectionClient {
    listener_id: Uuid,
    directory: String,
    target: ConnectTarget,
    connector: Arc<dyn SessionConnector>,
    observer: Arc<dyn ConnectionObserver>,
    throttle: NotificationThrottle,
    metrics: Option<Metrics>,
    session: Mutex<SessionSlot>,
    close_pending: AtomicBool,
}

impl ConnectionClient {
    /// Client for `config`, connecting lazily through `connector`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidTarget`] when the configured port is out of range.
    pub fn new(
        config: &ListenerConfig,
        connector: Arc<dyn SessionConnector>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> ClientResult<Self> {
        let target =
            ConnectTarget::from_listener(config).ok_or(ClientError::InvalidTarget { field: "port" })?;
        Ok(Self {
            listener_id: config.id,
            directory: config.directory.clone(),
            target,
            connector,
            observer,
            throttle: NotificationThrottle::global(),
            metrics: None,
            session: Mutex::new(None),
            close_pending: AtomicBool::new(false),
        })
    }

    /// Replace the process-wide notification throttle.
    #[must_use]
    pub fn with_throttle(mut self, throttle: NotificationThrottle) -> Self {
        self.throttle = throttle;
        self
    }

    /// Count connect failures in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Listener this client belongs to.
    #[must_use]
    pub const fn listener_id(&self) -> Uuid {
        self.listener_id
    }

    /// Run `op` on a connected session while holding the session lock.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] when no session can be established and
    /// [`ClientError::Operation`] when `op` fails.
    pub fn with_session<T>(
        &self,
        operation: &'static str,
        op: impl FnOnce(&mut dyn SftpSession) -> SessionResult<T>,
    ) -> ClientResult<T> {
        let mut slot = self.lock();
        self.apply_pending_close(&mut slot);
        let session = self.ensure_connected(&mut slot)?;
        let result = op(session).map_err(|source| ClientError::Operation { operation, source });
        self.apply_pending_close(&mut slot);
        result
    }

    /// Establish a session now if none is open.
    ///
    /// # Errors
    ///
    /// Returns the classified connect failure.
    pub fn connect(&self) -> ClientResult<()> {
        let mut slot = self.lock();
        self.apply_pending_close(&mut slot);
        self.ensure_connected(&mut slot)?;
        Ok(())
    }

    /// Whether a live session is currently held.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|session| session.is_connected())
    }

    /// List the configured directory.
    ///
    /// # Errors
    ///
    /// See [`ConnectionClient::with_session`].
    pub fn list_dir(&self) -> ClientResult<Vec<RemoteEntry>> {
        self.with_session("list_dir", |session| session.list_dir())
    }

    /// Rename within the configured directory.
    ///
    /// # Errors
    ///
    /// See [`ConnectionClient::with_session`].
    pub fn rename(&self, from: &str, to: &str) -> ClientResult<()> {
        self.with_session("rename", |session| session.rename(from, to))
    }

    /// Remove a file from the configured directory.
    ///
    /// # Errors
    ///
    /// See [`ConnectionClient::with_session`].
    pub fn remove(&self, path: &str) -> ClientResult<()> {
        self.with_session("remove", |session| session.remove(path))
    }

    /// Size of a file in the configured directory.
    ///
    /// # Errors
    ///
    /// See [`ConnectionClient::with_session`].
    pub fn file_size(&self, path: &str) -> ClientResult<u64> {
        self.with_session("file_size", |session| session.file_size(path))
    }

    /// Stream a file into `sink`. The session lock is held for the whole transfer.
    ///
    /// # Errors
    ///
    /// See [`ConnectionClient::with_session`].
    pub fn download(&self, path: &str, sink: &mut dyn Write) -> ClientResult<u64> {
        self.with_session("download", |session| session.download(path, sink))
    }

    /// Create or replace a file in the configured directory.
    ///
    /// # Errors
    ///
    /// See [`ConnectionClient::with_session`].
    pub fn upload(&self, path: &str, content: &[u8]) -> ClientResult<()> {
        self.with_session("upload", |session| session.upload(path, content))
    }

    /// Disconnect the current session, if any. Never fails or blocks; errors
    /// are logged. While another thread holds the session the disconnect is
    /// deferred until that thread's operation returns.
    pub fn close(&self) {
        let mut slot = match self.session.try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                self.close_pending.store(true, Ordering::Release);
                debug!(listener_id = %self.listener_id, "session busy; close deferred");
                return;
            }
        };
        self.close_pending.store(false, Ordering::Release);
        self.disconnect_slot(&mut slot);
    }

    fn apply_pending_close(&self, slot: &mut SessionSlot) {
        if self.close_pending.swap(false, Ordering::AcqRel) {
            self.disconnect_slot(slot);
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionSlot> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn disconnect_slot(&self, slot: &mut SessionSlot) {
        if let Some(mut session) = slot.take() {
            match session.disconnect() {
                Ok(()) => debug!(listener_id = %self.listener_id, "sftp session closed"),
                Err(err) => warn!(
                    listener_id = %self.listener_id,
                    error = %err,
                    detail = %err.describe(),
                    "failed to close sftp session cleanly"
                ),
            }
        }
    }

    fn ensure_connected<'a>(
        &self,
        slot: &'a mut SessionSlot,
    ) -> Result<&'a mut (dyn SftpSession + 'static), ConnectError> {
        if slot.as_ref().is_some_and(|session| !session.is_connected()) {
            debug!(listener_id = %self.listener_id, "sftp session dropped; reconnecting");
            self.disconnect_slot(slot);
        }

        if slot.is_none() {
            match self.open_session() {
                Ok(session) => {
                    info!(
                        listener_id = %self.listener_id,
                        address = %self.target.address(),
                        directory = %self.directory,
                        "sftp session established"
                    );
                    if self
                        .throttle
                        .permit(self.listener_id, NotificationKind::Connected)
                    {
                        self.observer
                            .on_connected(self.listener_id, &self.target.host);
                    }
                    *slot = Some(session);
                }
                Err(err) => {
                    warn!(
                        listener_id = %self.listener_id,
                        address = %self.target.address(),
                        kind = err.kind.label(),
                        detail = %err.message,
                        "sftp connection failed"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_connect_failure(err.kind.label());
                    }
                    if self
                        .throttle
                        .permit(self.listener_id, NotificationKind::ConnectionError)
                    {
                        self.observer.on_connection_error(self.listener_id, &err);
                    }
                    return Err(err);
                }
            }
        }

        match slot.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(ConnectError {
                kind: ConnectErrorKind::Other,
                message: "session slot empty after connect".to_string(),
            }),
        }
    }

    fn open_session(&self) -> Result<Box<dyn SftpSession>, ConnectError> {
        let mut session = self
            .connector
            .connect(&self.target)
            .map_err(|err| ConnectError::from_connect(&err))?;
        if let Err(err) = session.change_dir(&self.directory) {
            let classified = ConnectError::from_change_dir(&self.directory, &err);
            if let Err(close_err) = session.disconnect() {
                debug!(error = %close_err, "ignoring disconnect failure after change_dir error");
            }
            return Err(classified);
        }
        Ok(session)
    }
}

impl Drop for ConnectionClient {
    fn drop(&mut self) {
        let slot = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(mut session) = slot.take() {
            let _ = session.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sftpoll_test_support::{MemorySftp, listener_config};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl ConnectionObserver for Recorder {
        fn on_connected(&self, _listener_id: Uuid, host: &str) {
            self.seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(format!("connected:{host}"));
        }

        fn on_connection_error(&self, _listener_id: Uuid, error: &ConnectError) {
            self.seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(format!("error:{}", error.kind.label()));
        }
    }

    impl Recorder {
        fn seen(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    fn client(server: &MemorySftp, observer: Arc<Recorder>) -> ClientResult<ConnectionClient> {
        Ok(ConnectionClient::new(
            &listener_config(Uuid::new_v4(), 1),
            Arc::new(server.clone()),
            observer,
        )?
        .with_throttle(NotificationThrottle::new(Duration::from_secs(60))))
    }

    #[test]
    fn connects_lazily_and_enters_directory() -> ClientResult<()> {
        let server = MemorySftp::with_directory("/inbox");
        server.put("/inbox", "a.xml", "<a/>");
        let observer = Arc::new(Recorder::default());
        let client = client(&server, observer.clone())?;

        assert!(!client.is_connected());
        assert_eq!(client.file_size("a.xml")?, 4);
        assert!(client.is_connected());
        assert_eq!(server.connect_count(), 1);
        assert_eq!(observer.seen(), vec!["connected:sftp.test"]);
        Ok(())
    }

    #[test]
    fn reconnects_after_drop() -> ClientResult<()> {
        let server = MemorySftp::with_directory("/inbox");
        let client = client(&server, Arc::new(Recorder::default()))?;
        client.list_dir()?;
        server.drop_connections();
        client.list_dir()?;
        assert_eq!(server.connect_count(), 2);
        Ok(())
    }

    #[test]
    fn missing_directory_is_classified_fatal() -> ClientResult<()> {
        let server = MemorySftp::default();
        let observer = Arc::new(Recorder::default());
        let client = client(&server, observer.clone())?;

        let err = client.list_dir().expect_err("directory missing");
        let connect = err.as_connect().expect("connect failure");
        assert_eq!(connect.kind, ConnectErrorKind::DirectoryNotFound);
        assert!(connect.is_fatal());
        assert_eq!(observer.seen(), vec!["error:directory_not_found"]);
        Ok(())
    }

    #[test]
    fn connection_errors_are_rate_limited() -> ClientResult<()> {
        let server = MemorySftp::with_directory("/inbox");
        server.fail_next_connects(3);
        let observer = Arc::new(Recorder::default());
        let client = client(&server, observer.clone())?;

        for _ in 0..3 {
            assert!(client.connect().is_err());
        }
        client.connect()?;
        assert_eq!(observer.seen(), vec!["error:other", "connected:sftp.test"]);
        Ok(())
    }

    #[test]
    fn operation_errors_keep_the_session() -> ClientResult<()> {
        let server = MemorySftp::with_directory("/inbox");
        let client = client(&server, Arc::new(Recorder::default()))?;
        let err = client.rename("missing", "missing.processing").expect_err("missing");
        assert!(err.is_not_found());
        assert!(client.is_connected());
        Ok(())
    }

    #[test]
    fn close_is_idempotent() -> ClientResult<()> {
        let server = MemorySftp::with_directory("/inbox");
        let client = client(&server, Arc::new(Recorder::default()))?;
        client.connect()?;
        client.close();
        client.close();
        assert!(!client.is_connected());
        assert_eq!(server.disconnect_count(), 1);
        Ok(())
    }

    #[test]
    fn close_during_a_transfer_returns_and_disconnects_afterwards() -> ClientResult<()> {
        let server = MemorySftp::with_directory("/inbox");
        server.put("/inbox", "a.xml", "<a/>");
        server.delay_downloads(Some(Duration::from_millis(600)));
        let client = Arc::new(client(&server, Arc::new(Recorder::default()))?);
        client.connect()?;

        let downloader = Arc::clone(&client);
        let transfer = std::thread::spawn(move || {
            let mut sink = Vec::new();
            downloader.download("a.xml", &mut sink).map(|_| sink)
        });
        std::thread::sleep(Duration::from_millis(150));

        let started = std::time::Instant::now();
        client.close();
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(server.disconnect_count(), 0);

        let body = transfer.join().expect("transfer thread panicked")?;
        assert_eq!(body, b"<a/>");
        assert_eq!(server.disconnect_count(), 1);
        assert!(!client.is_connected());
        Ok(())
    }
}
