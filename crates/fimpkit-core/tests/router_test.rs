#![allow(clippy::unwrap_used)]
// End-to-end router tests over the in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use fimpkit_api::address::{MSG_TYPE_CMD, MSG_TYPE_EVT};
use fimpkit_api::{Address, Envelope, MemoryTransport, Message, Transport};
use fimpkit_core::router::handler_fn;
use fimpkit_core::{MessageVoter, Router, RouterConfig, Routing};

// ── Helpers ─────────────────────────────────────────────────────────

const WAIT: Duration = Duration::from_secs(2);

fn switch_address() -> Address {
    Address::device(MSG_TYPE_CMD, "test", "1", "out_bin_switch", "2")
}

fn command_routing(routing: impl Fn(Message) -> Option<Message> + Send + Sync + 'static) -> Routing {
    let routing = Arc::new(routing);
    Routing::new(
        handler_fn(move |msg: Message| {
            let routing = Arc::clone(&routing);
            async move { routing(msg) }
        }),
        vec![
            MessageVoter::Topic("pt:j1/mt:cmd/#".into()),
            MessageVoter::message_type("cmd.binary.set"),
        ],
    )
}

async fn start(transport: &Arc<MemoryTransport>, routings: Vec<Routing>, config: RouterConfig) -> Router {
    let router = Router::new(transport.clone(), "test", routings, config);
    transport.subscribe(&router.topics()).await.unwrap();
    router.start().await.unwrap();
    router
}

// ── Reply routing ───────────────────────────────────────────────────

#[tokio::test]
async fn test_reply_goes_to_resp_to_with_default_corid() {
    let transport = Arc::new(MemoryTransport::new());
    let router = start(
        &transport,
        vec![command_routing(|_msg| {
            Some(Message::unaddressed(Envelope::new_bool(
                "evt.binary.report",
                "out_bin_switch",
                true,
            )))
        })],
        RouterConfig::default(),
    )
    .await;

    let request = Envelope::new_bool("cmd.binary.set", "out_bin_switch", true)
        .with_response_to("pt:j1/mt:rsp/rt:app/rn:tester/ad:1");
    transport.inject(&switch_address(), &request).await.unwrap();

    let published = transport.wait_published(1, WAIT).await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "pt:j1/mt:rsp/rt:app/rn:tester/ad:1");
    assert_eq!(published[0].payload.correlation_id, request.uid);

    router.stop().await.unwrap();
}

#[tokio::test]
async fn test_reply_without_resp_to_uses_reply_address() {
    let transport = Arc::new(MemoryTransport::new());
    let router = start(
        &transport,
        vec![command_routing(|_msg| {
            Some(Message::new(
                Address::device(MSG_TYPE_EVT, "test", "1", "out_bin_switch", "2"),
                Envelope::new_bool("evt.binary.report", "out_bin_switch", true),
            ))
        })],
        RouterConfig::default(),
    )
    .await;

    let request = Envelope::new_bool("cmd.binary.set", "out_bin_switch", true);
    transport.inject(&switch_address(), &request).await.unwrap();

    let published = transport.wait_published(1, WAIT).await;
    assert_eq!(
        published[0].topic,
        "pt:j1/mt:evt/rt:dev/rn:test/ad:1/sv:out_bin_switch/ad:2"
    );
    router.stop().await.unwrap();
}

#[tokio::test]
async fn test_unaddressed_reply_without_resp_to_is_dropped() {
    let transport = Arc::new(MemoryTransport::new());
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&handled);
    let router = start(
        &transport,
        vec![command_routing(move |_msg| {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(Message::unaddressed(Envelope::new_null("evt.binary.report", "out_bin_switch")))
        })],
        RouterConfig::default(),
    )
    .await;

    let request = Envelope::new_bool("cmd.binary.set", "out_bin_switch", true);
    transport.inject(&switch_address(), &request).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert!(transport.published().is_empty());
    router.stop().await.unwrap();
}

// ── Panic isolation ─────────────────────────────────────────────────

#[tokio::test]
async fn test_panicking_routing_does_not_stop_worker_or_siblings() {
    let transport = Arc::new(MemoryTransport::new());
    let handled = Arc::new(AtomicUsize::new(0));
    let panics = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&handled);
    let panic_counter = Arc::clone(&panics);
    let config = RouterConfig::default()
        .with_workers(1)
        .on_panic(move |_msg, reason| {
            assert!(reason.contains("boom"));
            panic_counter.fetch_add(1, Ordering::SeqCst);
        });

    let router = start(
        &transport,
        vec![
            command_routing(|_msg| panic!("boom")),
            command_routing(move |_msg| {
                counter.fetch_add(1, Ordering::SeqCst);
                None
            }),
        ],
        config,
    )
    .await;

    let request = Envelope::new_bool("cmd.binary.set", "out_bin_switch", true);
    transport.inject(&switch_address(), &request).await.unwrap();
    transport.inject(&switch_address(), &request).await.unwrap();

    tokio::time::timeout(WAIT, async {
        while handled.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(panics.load(Ordering::SeqCst), 2);
    router.stop().await.unwrap();
}

// ── Ordering ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_single_worker_preserves_arrival_order() {
    let transport = Arc::new(MemoryTransport::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let router = start(
        &transport,
        vec![command_routing(move |msg| {
            tx.send(msg.payload.int_value().unwrap()).unwrap();
            None
        })],
        RouterConfig::default().with_workers(1),
    )
    .await;

    for i in 0..20 {
        let request = Envelope::new_int("cmd.binary.set", "out_bin_switch", i);
        transport.inject(&switch_address(), &request).await.unwrap();
    }

    let mut seen = Vec::new();
    while seen.len() < 20 {
        seen.push(tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap());
    }
    assert_eq!(seen, (0..20).collect::<Vec<i64>>());
    router.stop().await.unwrap();
}

#[tokio::test]
async fn test_every_matching_routing_runs_once_with_many_workers() {
    let transport = Arc::new(MemoryTransport::new());
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&handled);
    let router = start(
        &transport,
        vec![command_routing(move |_msg| {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        })],
        RouterConfig::default().with_workers(4),
    )
    .await;

    for _ in 0..50 {
        let request = Envelope::new_bool("cmd.binary.set", "out_bin_switch", true);
        transport.inject(&switch_address(), &request).await.unwrap();
    }

    tokio::time::timeout(WAIT, async {
        while handled.load(Ordering::SeqCst) < 50 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handled.load(Ordering::SeqCst), 50);
    router.stop().await.unwrap();
}

// ── Callbacks ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_callbacks_see_messages_routings_and_final_reply() {
    let transport = Arc::new(MemoryTransport::new());
    let received = Arc::new(AtomicUsize::new(0));
    let processed = Arc::new(AtomicUsize::new(0));
    let responses = Arc::new(std::sync::Mutex::new(Vec::new()));

    let received_counter = Arc::clone(&received);
    let processed_counter = Arc::clone(&processed);
    let response_log = Arc::clone(&responses);
    let config = RouterConfig::default()
        .with_workers(1)
        .on_message(move |_msg| {
            received_counter.fetch_add(1, Ordering::SeqCst);
        })
        .on_process(move |_msg| {
            processed_counter.fetch_add(1, Ordering::SeqCst);
        })
        .on_response(move |inbound, outbound| {
            response_log.lock().unwrap().push((
                inbound.payload.uid.clone(),
                outbound.payload.correlation_id.clone(),
                outbound.topic.clone(),
            ));
        });

    let level_routing = Routing::new(
        handler_fn(|_msg: Message| async { None }),
        vec![
            MessageVoter::Topic("pt:j1/mt:cmd/#".into()),
            MessageVoter::message_type("cmd.lvl.set"),
        ],
    );
    let router = start(
        &transport,
        vec![
            command_routing(|_msg| {
                Some(Message::unaddressed(Envelope::new_bool(
                    "evt.binary.report",
                    "out_bin_switch",
                    true,
                )))
            }),
            level_routing,
        ],
        config,
    )
    .await;

    let request = Envelope::new_bool("cmd.binary.set", "out_bin_switch", true)
        .with_response_to("pt:j1/mt:rsp/rt:app/rn:tester/ad:1");
    transport.inject(&switch_address(), &request).await.unwrap();
    let published = transport.wait_published(1, WAIT).await;
    assert_eq!(published.len(), 1);

    assert_eq!(received.load(Ordering::SeqCst), 1);
    assert_eq!(processed.load(Ordering::SeqCst), 1);
    let responses = responses.lock().unwrap().clone();
    assert_eq!(
        responses,
        vec![(
            request.uid.clone(),
            request.uid.clone(),
            "pt:j1/mt:rsp/rt:app/rn:tester/ad:1".to_owned(),
        )]
    );
    router.stop().await.unwrap();
}

// ── Global prefix ───────────────────────────────────────────────────

#[tokio::test]
async fn test_prefixed_command_is_routed_and_reply_keeps_prefix() {
    let transport = Arc::new(MemoryTransport::new());
    let routing = Routing::new(
        handler_fn(|_msg: Message| async {
            Some(Message::new(
                Address::device(MSG_TYPE_EVT, "test", "1", "out_bin_switch", "2"),
                Envelope::new_bool("evt.binary.report", "out_bin_switch", true),
            ))
        }),
        vec![
            MessageVoter::topic(&Address::device(MSG_TYPE_CMD, "", "", "out_bin_switch", "")),
            MessageVoter::message_type("cmd.binary.set"),
        ],
    );
    let router = start(
        &transport,
        vec![routing],
        RouterConfig::default().with_preserve_global_prefix(true),
    )
    .await;
    transport.subscribe(&["site-1/#".to_owned()]).await.unwrap();

    let mut inbound = switch_address();
    inbound.global_prefix = "site-1".into();
    let request = Envelope::new_bool("cmd.binary.set", "out_bin_switch", true);
    transport.inject(&inbound, &request).await.unwrap();

    let published = transport.wait_published(1, WAIT).await;
    assert_eq!(published.len(), 1);
    assert_eq!(
        published[0].topic,
        "site-1/pt:j1/mt:evt/rt:dev/rn:test/ad:1/sv:out_bin_switch/ad:2"
    );
    assert_eq!(published[0].payload.correlation_id, request.uid);
    router.stop().await.unwrap();
}
