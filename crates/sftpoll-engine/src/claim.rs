//! Exclusive claiming of new files in a listener directory.
//!
//! A file is claimed by renaming it to `<name>.processing`. When several
//! listeners share a directory only one rename can win; losers see an
//! operation error and skip the file.

use std::collections::HashSet;

use sftpoll_config::ListenerConfig;
use sftpoll_core::{PROCESSED_SUFFIX, PROCESSING_SUFFIX, has_marker_suffix};
use sftpoll_transport::{ClientError, ConnectionClient};
use tracing::debug;

use crate::error::ClaimError;

/// Claim every eligible file, returning the original names in listing order.
///
/// A file is eligible when it is a regular file, carries no marker suffix,
/// has no `.processed` sibling and is not excluded by the listener's ignored
/// extensions.
///
/// # Errors
///
/// Returns the listing failure, or a connect failure raised while renaming
/// together with the files claimed before it. Individual rename failures are
/// skipped.
pub fn claim_files(
    client: &ConnectionClient,
    config: &ListenerConfig,
) -> Result<Vec<String>, ClaimError> {
    let processed: HashSet<String> = client
        .list_dir()
        .map_err(|err| ClaimError::new(Vec::new(), err))?
        .into_iter()
        .filter_map(|entry| entry.name.strip_suffix(PROCESSED_SUFFIX).map(str::to_string))
        .collect();

    let mut claimed = Vec::new();
    let listing = client
        .list_dir()
        .map_err(|err| ClaimError::new(Vec::new(), err))?;
    for entry in listing {
        let eligible = entry.is_file();
        let name = entry.name;
        if !eligible
            || has_marker_suffix(&name)
            || processed.contains(&name)
            || config.is_ignored(&name)
        {
            continue;
        }
        match client.rename(&name, &format!("{name}{PROCESSING_SUFFIX}")) {
            Ok(()) => claimed.push(name),
            Err(err @ ClientError::Connect(_)) => return Err(ClaimError::new(claimed, err)),
            Err(err) => {
                debug!(
                    listener_id = %config.id,
                    file = %name,
                    error = %err.describe(),
                    "file claimed elsewhere or vanished; skipping"
                );
            }
        }
    }
    Ok(claimed)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use sftpoll_events::EventBus;
    use sftpoll_test_support::{FIXTURE_DIRECTORY, MemorySftp, listener_config, listener_definition};
    use sftpoll_config::StaticSecretResolver;
    use sftpoll_transport::{EventBusObserver, NotificationThrottle};
    use uuid::Uuid;

    fn client_for(server: &MemorySftp, config: &ListenerConfig) -> ConnectionClient {
        ConnectionClient::new(
            config,
            Arc::new(server.clone()),
            Arc::new(EventBusObserver::new(EventBus::with_capacity(8))),
        )
        .expect("fixture port is valid")
        .with_throttle(NotificationThrottle::new(Duration::from_secs(60)))
    }

    #[test]
    fn claims_only_eligible_files() -> anyhow::Result<()> {
        let server = MemorySftp::with_directory(FIXTURE_DIRECTORY);
        server.put(FIXTURE_DIRECTORY, "a.xml", "<a/>");
        server.put(FIXTURE_DIRECTORY, "b.xml", "<b/>");
        server.put(FIXTURE_DIRECTORY, "b.xml.processed", "");
        server.put(FIXTURE_DIRECTORY, "c.xml.processing", "");
        server.put(FIXTURE_DIRECTORY, "d.xml.response", "");
        server.put(FIXTURE_DIRECTORY, "e.tmp", "");
        server.create_dir(&format!("{FIXTURE_DIRECTORY}/nested"));

        let mut definition = listener_definition(Uuid::new_v4(), 1);
        definition.ignored_extensions = vec![".tmp".to_string()];
        let config = ListenerConfig::resolve(definition, &StaticSecretResolver::default());
        let client = client_for(&server, &config);

        let claimed = claim_files(&client, &config)?;
        assert_eq!(claimed, vec!["a.xml".to_string()]);
        assert!(server.names(FIXTURE_DIRECTORY).contains(&"a.xml.processing".to_string()));
        assert!(server.names(FIXTURE_DIRECTORY).contains(&"b.xml".to_string()));
        assert!(server.names(FIXTURE_DIRECTORY).contains(&"e.tmp".to_string()));
        Ok(())
    }

    #[test]
    fn failed_renames_are_skipped() -> anyhow::Result<()> {
        let server = MemorySftp::with_directory(FIXTURE_DIRECTORY);
        server.put(FIXTURE_DIRECTORY, "a.xml", "<a/>");
        server.put(FIXTURE_DIRECTORY, "b.xml", "<b/>");
        server.put(FIXTURE_DIRECTORY, "c.xml", "<c/>");
        server.fail_rename_of("a.xml");
        server.vanish_on_rename("b.xml");

        let config = listener_config(Uuid::new_v4(), 1);
        let claimed = claim_files(&client_for(&server, &config), &config)?;
        assert_eq!(claimed, vec!["c.xml".to_string()]);
        Ok(())
    }

    #[test]
    fn competing_listeners_claim_each_file_once() {
        let server = MemorySftp::with_directory(FIXTURE_DIRECTORY);
        for index in 0..50 {
            server.put(FIXTURE_DIRECTORY, &format!("{index:02}.xml"), "x");
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let server = server.clone();
                thread::spawn(move || {
                    let config = listener_config(Uuid::new_v4(), 1);
                    let client = client_for(&server, &config);
                    claim_files(&client, &config).expect("claim pass")
                })
            })
            .collect();

        let mut all: Vec<String> = handles
            .into_iter()
            .flat_map(|handle| handle.join().expect("claimer panicked"))
            .collect();
        all.sort();
        let expected: Vec<String> = (0..50).map(|index| format!("{index:02}.xml")).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn listing_failure_propagates() {
        let server = MemorySftp::with_directory(FIXTURE_DIRECTORY);
        server.fail_next_lists(1);
        let config = listener_config(Uuid::new_v4(), 1);
        let err = claim_files(&client_for(&server, &config), &config).expect_err("listing fails");
        assert!(err.claimed.is_empty());
        assert!(matches!(err.source, ClientError::Operation { operation: "list_dir", .. }));
    }

    #[test]
    fn connect_failure_mid_pass_returns_earlier_claims() {
        let server = MemorySftp::with_directory(FIXTURE_DIRECTORY);
        server.put(FIXTURE_DIRECTORY, "a.xml", "<a/>");
        server.put(FIXTURE_DIRECTORY, "b.xml", "<b/>");
        server.go_offline_after_rename("a.xml");

        let config = listener_config(Uuid::new_v4(), 1);
        let err = claim_files(&client_for(&server, &config), &config).expect_err("server went away");
        assert_eq!(err.claimed, vec!["a.xml".to_string()]);
        assert!(matches!(err.source, ClientError::Connect(_)));
        assert_eq!(
            server.names(FIXTURE_DIRECTORY),
            vec!["a.xml.processing".to_string(), "b.xml".to_string()]
        );
    }
}
