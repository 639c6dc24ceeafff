//! Listener fixtures and synchronisation helpers.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use sftpoll_config::{ListenerConfig, ListenerDefinition, StaticSecretResolver};
use uuid::Uuid;

/// Directory used by default fixtures.
pub const FIXTURE_DIRECTORY: &str = "/inbox";

/// Active XML listener polling [`FIXTURE_DIRECTORY`] every second.
#[must_use]
pub fn listener_definition(id: Uuid, version: i64) -> ListenerDefinition {
    ListenerDefinition {
        id,
        version,
        name: format!("listener-{id}"),
        active: true,
        hostname: "sftp.test".to_string(),
        port: 22,
        username: "gateway".to_string(),
        password_secret: None,
        private_key_secret: None,
        host_key_fingerprint: None,
        directory: FIXTURE_DIRECTORY.to_string(),
        polling_interval_secs: 1,
        content_type: "text/xml; charset=utf-8".to_string(),
        delete_on_receive: false,
        enable_responses: true,
        hardwired_service: None,
        ignored_extensions: Vec::new(),
    }
}

/// Resolved form of [`listener_definition`] without credentials.
#[must_use]
pub fn listener_config(id: Uuid, version: i64) -> ListenerConfig {
    ListenerConfig::resolve(
        listener_definition(id, version),
        &StaticSecretResolver::default(),
    )
}

/// Poll `predicate` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// One-shot latch that blocks callers until opened.
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    /// Release every current and future waiter.
    pub fn open(&self) {
        let (lock, signal) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        signal.notify_all();
    }

    /// Block until opened or `timeout` elapses; returns whether the gate opened.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, signal) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = signal
            .wait_timeout_while(guard, timeout, |open| !*open)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_resolve_without_credentials() {
        let config = listener_config(Uuid::from_u128(1), 3);
        assert_eq!(config.version, 3);
        assert_eq!(config.directory, FIXTURE_DIRECTORY);
        assert!(!config.credential.is_present());
    }

    #[test]
    fn gate_releases_waiters() {
        let gate = Gate::default();
        assert!(!gate.wait(Duration::from_millis(10)));
        let opener = gate.clone();
        let handle = thread::spawn(move || opener.open());
        assert!(gate.wait(Duration::from_secs(5)));
        handle.join().expect("opener thread");
    }

    #[test]
    fn wait_until_times_out() {
        assert!(!wait_until(Duration::from_millis(30), || false));
        assert!(wait_until(Duration::from_millis(30), || true));
    }
}
