use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sftpoll_events::{Event, EventBus};
use sftpoll_test_support::{listener_config, local_sandbox};
use sftpoll_transport::{ConnectionClient, EventBusObserver, NotificationThrottle};
use uuid::Uuid;

#[test]
fn local_directory_round_trip_through_client() -> anyhow::Result<()> {
    let (temp, connector) = local_sandbox()?;
    fs::write(temp.path().join("inbox/order.xml"), b"<order/>")?;

    let bus = EventBus::with_capacity(16);
    let config = listener_config(Uuid::new_v4(), 1);
    let client = ConnectionClient::new(
        &config,
        Arc::new(connector),
        Arc::new(EventBusObserver::new(bus.clone())),
    )?
    .with_throttle(NotificationThrottle::new(Duration::from_secs(60)));

    client.rename("order.xml", "order.xml.processing")?;
    let mut body = Vec::new();
    client.download("order.xml.processing", &mut body)?;
    assert_eq!(body, b"<order/>");
    client.upload("order.xml.response", b"<ack/>")?;
    client.remove("order.xml.processing")?;

    let mut names: Vec<_> = client.list_dir()?.into_iter().map(|entry| entry.name).collect();
    names.sort();
    assert_eq!(names, vec!["order.xml.response"]);

    let events = bus.recent();
    assert!(matches!(
        events.first().map(|envelope| &envelope.event),
        Some(Event::ListenerConnected { listener_id, .. }) if *listener_id == config.id
    ));
    Ok(())
}

#[test]
fn concurrent_callers_are_serialized() -> anyhow::Result<()> {
    let (temp, connector) = local_sandbox()?;
    for index in 0..16 {
        fs::write(temp.path().join(format!("inbox/{index}.xml")), b"x")?;
    }
    let client = Arc::new(
        ConnectionClient::new(
            &listener_config(Uuid::new_v4(), 1),
            Arc::new(connector),
            Arc::new(EventBusObserver::new(EventBus::with_capacity(4))),
        )?
        .with_throttle(NotificationThrottle::new(Duration::from_secs(60))),
    );

    let handles: Vec<_> = (0..16)
        .map(|index| {
            let client = client.clone();
            thread::spawn(move || client.rename(&format!("{index}.xml"), &format!("{index}.xml.processing")))
        })
        .collect();
    for handle in handles {
        handle.join().expect("rename thread panicked")?;
    }

    let claimed = client
        .list_dir()?
        .into_iter()
        .filter(|entry| entry.name.ends_with(".processing"))
        .count();
    assert_eq!(claimed, 16);
    Ok(())
}
