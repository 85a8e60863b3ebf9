#![allow(clippy::unwrap_used)]
// Prime observer against a scripted hub on the in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use fimpkit_api::{Address, Envelope, MemoryTransport, Publisher, Transport};
use fimpkit_core::observer::{
    ComponentKind, Loader, Observer, PrimeLoader, CMD_PD7_REQUEST, EVT_PD7_NOTIFY, EVT_PD7_RESPONSE,
};
use fimpkit_core::observer::{PrimeCommand, PrimeEvent};
use fimpkit_core::{CoreError, EventManager, Router, RouterConfig};

// ── Scripted hub ────────────────────────────────────────────────────

const WAIT: Duration = Duration::from_secs(2);

/// Answers every `cmd.pd7.request` with `response`, counting requests.
async fn spawn_hub(transport: &Arc<MemoryTransport>, response: serde_json::Value) -> Arc<AtomicUsize> {
    let requests = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::channel(16);
    transport.register_channel("hub", tx);
    transport
        .subscribe(&[PrimeLoader::request_address().to_topic()])
        .await
        .unwrap();

    let hub = Arc::clone(transport);
    let counter = Arc::clone(&requests);
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if msg.payload.msg_type != CMD_PD7_REQUEST {
                continue;
            }
            counter.fetch_add(1, Ordering::SeqCst);
            let reply_to = Address::parse(&msg.payload.response_to).unwrap();
            let reply = Envelope::new_object(EVT_PD7_RESPONSE, "vinculum", &response)
                .unwrap()
                .with_correlation_id(&msg.payload.uid);
            hub.publish(&reply_to, &reply).await.unwrap();
        }
    });
    requests
}

fn catalog() -> serde_json::Value {
    json!({
        "success": true,
        "errors": null,
        "param": {
            "device": [{"id": 1, "client": {"name": "Lamp"}, "room": 5}],
            "room": [{"id": 5, "client": {"name": "Kitchen"}, "area": 9}],
            "area": [{"id": 9, "name": "Home", "type": "home"}],
            "thing": []
        }
    })
}

fn notification(cmd: &str, component: &str, id: i64, param: serde_json::Value) -> Envelope {
    Envelope::new_object(
        EVT_PD7_NOTIFY,
        "vinculum",
        &json!({"cmd": cmd, "component": component, "id": id, "param": param}),
    )
    .unwrap()
}

// ── Loader ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_prime_loader_parses_catalog() {
    let transport = Arc::new(MemoryTransport::new());
    let requests = spawn_hub(&transport, catalog()).await;

    let loader = PrimeLoader::new(transport.clone(), "observer-test", WAIT);
    let snapshot = loader.load(&ComponentKind::ALL).await.unwrap();

    assert_eq!(requests.load(Ordering::SeqCst), 1);
    assert_eq!(snapshot.devices.len(), 1);
    assert_eq!(snapshot.devices[0].client.name.as_deref(), Some("Lamp"));
    assert_eq!(snapshot.rooms[0].area, Some(9));
    assert_eq!(snapshot.areas[0].area_type.as_deref(), Some("home"));
    assert!(snapshot.things.is_empty());

    let request = transport.published_of_type(CMD_PD7_REQUEST).remove(0);
    let body = request.payload.object_value().unwrap();
    assert_eq!(body["cmd"], "get");
    assert_eq!(body["param"]["components"], json!(["device", "thing", "room", "area"]));
    assert_eq!(request.payload.response_to, "pt:j1/mt:rsp/rt:app/rn:observer-test/ad:1");
}

#[tokio::test]
async fn test_prime_loader_rejects_unsuccessful_response() {
    let transport = Arc::new(MemoryTransport::new());
    spawn_hub(&transport, json!({"success": false, "errors": "not allowed"})).await;

    let loader = PrimeLoader::new(transport.clone(), "observer-test", WAIT);
    let err = loader.load(&[ComponentKind::Device]).await.unwrap_err();
    assert!(matches!(err, CoreError::Prime(_)));
    assert!(err.to_string().contains("not allowed"));
}

#[tokio::test(start_paused = true)]
async fn test_prime_loader_times_out_without_hub() {
    let transport = Arc::new(MemoryTransport::new());
    let loader = PrimeLoader::new(transport, "observer-test", Duration::from_secs(5));

    let err = loader.load(&[ComponentKind::Device]).await.unwrap_err();
    assert!(err.to_string().contains("no response"), "{err}");
}

// ── Notifications ───────────────────────────────────────────────────

#[tokio::test]
async fn test_notifications_update_snapshot_and_announce_changes() {
    let transport = Arc::new(MemoryTransport::new());
    let requests = spawn_hub(&transport, catalog()).await;

    let events = EventManager::new();
    let loader = Arc::new(PrimeLoader::new(transport.clone(), "observer-test", WAIT));
    let observer = Arc::new(Observer::new(loader, events.clone(), Duration::from_secs(3600)));
    let mut device_events = events.subscribe(PrimeEvent::filter(ComponentKind::Device));

    let router = Router::new(transport.clone(), "observer", vec![observer.routing()], RouterConfig::default());
    transport.subscribe(&router.topics()).await.unwrap();
    router.start().await.unwrap();

    assert_eq!(observer.devices().await.len(), 1);
    assert_eq!(requests.load(Ordering::SeqCst), 1);

    transport
        .inject(
            &Observer::notify_address(),
            &notification("add", "device", 2, json!({"id": 2, "client": {"name": "Plug"}})),
        )
        .await
        .unwrap();
    let event = tokio::time::timeout(WAIT, device_events.recv()).await.unwrap().unwrap();
    assert_eq!(
        event.payload::<PrimeEvent>(),
        Some(&PrimeEvent {
            command: PrimeCommand::Add,
            component: Some(ComponentKind::Device),
            id: Some(2),
        })
    );
    assert_eq!(observer.devices().await.len(), 2);
    assert_eq!(
        observer.device(2).await.unwrap().client.name.as_deref(),
        Some("Plug")
    );

    transport
        .inject(
            &Observer::notify_address(),
            &notification("delete", "device", 2, serde_json::Value::Null),
        )
        .await
        .unwrap();
    let event = tokio::time::timeout(WAIT, device_events.recv()).await.unwrap().unwrap();
    assert_eq!(event.payload::<PrimeEvent>().unwrap().command, PrimeCommand::Delete);
    assert_eq!(observer.devices().await.len(), 1);
    assert!(observer.device(2).await.is_none());

    // Incremental updates never reload.
    assert_eq!(requests.load(Ordering::SeqCst), 1);
    router.stop().await.unwrap();
}

#[tokio::test]
async fn test_room_changes_do_not_reach_device_listeners() {
    let transport = Arc::new(MemoryTransport::new());
    spawn_hub(&transport, catalog()).await;

    let events = EventManager::new();
    let loader = Arc::new(PrimeLoader::new(transport.clone(), "observer-test", WAIT));
    let observer = Arc::new(Observer::new(loader, events.clone(), Duration::from_secs(3600)));
    let mut device_events = events.subscribe(PrimeEvent::filter(ComponentKind::Device));
    let mut room_events = events.subscribe(PrimeEvent::filter(ComponentKind::Room));
    observer.refresh().await.unwrap();

    transport.subscribe(&[Observer::notify_address().to_topic()]).await.unwrap();
    let router = Router::new(transport.clone(), "observer", vec![observer.routing()], RouterConfig::default());
    router.start().await.unwrap();

    transport
        .inject(
            &Observer::notify_address(),
            &notification("edit", "room", 5, json!({"id": 5, "client": {"name": "Pantry"}, "area": 9})),
        )
        .await
        .unwrap();

    let event = tokio::time::timeout(WAIT, room_events.recv()).await.unwrap().unwrap();
    assert_eq!(event.payload::<PrimeEvent>().unwrap().command, PrimeCommand::Edit);
    assert_eq!(
        observer.room(5).await.unwrap().client.name.as_deref(),
        Some("Pantry")
    );
    assert!(
        tokio::time::timeout(Duration::from_millis(100), device_events.recv())
            .await
            .is_err()
    );
    router.stop().await.unwrap();
}
