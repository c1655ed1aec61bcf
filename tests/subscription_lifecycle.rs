//! Subscription lifecycle and reconnection tests.
//!
//! Everything runs on the test thread: the in-memory transport plays the
//! backend, the manual timer plays the clock, and `process_pending` drives
//! the client's event loop.

use bookclub_realtime::{
    ChangeEvent, ChangeKind, ChannelStatus, EventFilter, ManualTimer, MemoryTransport, Predicate,
    RealtimeClient, RealtimeConfig, RealtimeError, SubscriptionConfig, SubscriptionId,
    SubscriptionStatus,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn setup() -> (Arc<RealtimeClient>, Arc<MemoryTransport>, Arc<ManualTimer>) {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new());
    let timer = Arc::new(ManualTimer::new());
    let client =
        RealtimeClient::new(RealtimeConfig::default(), transport.clone(), timer.clone()).unwrap();
    (client, transport, timer)
}

fn conversation(id: &str) -> SubscriptionConfig {
    SubscriptionConfig::new("messages")
        .event(EventFilter::Insert)
        .filter("conversation_id", id)
        .on_change(|_| Ok(()))
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Counters shared with a subscription's handlers.
#[derive(Clone, Default)]
struct Calls {
    errors: Arc<Mutex<Vec<RealtimeError>>>,
    reconnects: Arc<Mutex<Vec<u32>>>,
    changes: Arc<AtomicUsize>,
}

impl Calls {
    fn wire(&self, config: SubscriptionConfig) -> SubscriptionConfig {
        let errors = Arc::clone(&self.errors);
        let reconnects = Arc::clone(&self.reconnects);
        let changes = Arc::clone(&self.changes);
        config
            .on_change(move |_| {
                changes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .on_error(move |_, err| errors.lock().push(err.clone()))
            .on_reconnect(move |_, attempt| reconnects.lock().push(attempt))
    }
}

/// Fail the subscription's live channel and let the client react.
fn fail_channel(client: &RealtimeClient, transport: &MemoryTransport, id: &SubscriptionId) {
    assert!(transport.emit_status(id, ChannelStatus::ChannelError));
    client.process_pending();
}

// --- Identity ---

#[test]
fn test_identical_configs_share_one_channel() {
    let (client, transport, _timer) = setup();

    let first = client.subscribe(conversation("c1")).unwrap();
    let second = client.subscribe(conversation("c1")).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.as_str(), "messages:INSERT:conversation_id=c1");
    assert_eq!(transport.open_count(), 1);
    assert_eq!(client.subscription_count(), 1);
}

#[test]
fn test_reordered_predicate_keys_share_one_channel() {
    let (client, transport, _timer) = setup();

    let a = client
        .subscribe(
            SubscriptionConfig::new("rsvps")
                .filter("event_id", "e9")
                .filter("club_id", "k2")
                .on_change(|_| Ok(())),
        )
        .unwrap();
    let b = client
        .subscribe(
            SubscriptionConfig::new("rsvps")
                .predicate(Predicate::new().where_eq("club_id", "k2").where_eq("event_id", "e9"))
                .on_change(|_| Ok(())),
        )
        .unwrap();

    assert_eq!(a, b);
    assert_eq!(transport.open_count(), 1);
}

#[test]
fn test_different_predicates_get_separate_channels() {
    let (client, transport, _timer) = setup();

    let c1 = client.subscribe(conversation("c1")).unwrap();
    let c2 = client.subscribe(conversation("c2")).unwrap();

    assert_ne!(c1, c2);
    assert_eq!(transport.open_count(), 2);
}

#[test]
fn test_separator_in_filter_value_does_not_merge_subscriptions() {
    let (client, transport, _timer) = setup();
    let packed = Calls::default();
    let split = Calls::default();

    let a = client
        .subscribe(packed.wire(SubscriptionConfig::new("rsvps").filter("club_id", "7,event_id=3")))
        .unwrap();
    let b = client
        .subscribe(
            split.wire(
                SubscriptionConfig::new("rsvps")
                    .filter("club_id", "7")
                    .filter("event_id", "3"),
            ),
        )
        .unwrap();

    assert_ne!(a, b);
    assert_eq!(transport.open_count(), 2);

    transport.acknowledge_all();
    transport.publish(&ChangeEvent::new(
        "rsvps",
        ChangeKind::Insert,
        json!({"club_id": "7", "event_id": "3"}),
    ));
    client.process_pending();

    assert_eq!(split.changes.load(Ordering::SeqCst), 1);
    assert_eq!(packed.changes.load(Ordering::SeqCst), 0);
}

#[test]
fn test_concurrent_subscribes_open_exactly_one_channel() {
    let (client, transport, _timer) = setup();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = Arc::clone(&client);
            std::thread::spawn(move || client.subscribe(conversation("c1")).unwrap())
        })
        .collect();
    let ids: Vec<SubscriptionId> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(transport.open_count(), 1);
}

// --- Status ---

#[test]
fn test_pending_then_subscribed() {
    let (client, transport, _timer) = setup();
    let id = client.subscribe(conversation("c1")).unwrap();

    assert_eq!(client.get_status(&id), Some(SubscriptionStatus::Pending));

    transport.emit_status(&id, ChannelStatus::Subscribed);
    client.process_pending();

    assert_eq!(client.get_status(&id), Some(SubscriptionStatus::Subscribed));
}

#[test]
fn test_unknown_identity_has_no_status() {
    let (client, _transport, _timer) = setup();
    let id = SubscriptionId("messages:*".to_string());

    assert_eq!(client.get_status(&id), None);
    assert!(!client.unsubscribe(&id));
}

#[test]
fn test_change_events_reach_handler() {
    let (client, transport, _timer) = setup();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    client
        .subscribe(
            SubscriptionConfig::new("messages")
                .event(EventFilter::Insert)
                .filter("conversation_id", "c1")
                .on_change(move |change| {
                    sink.lock().push(change.record["body"].clone());
                    Ok(())
                }),
        )
        .unwrap();
    transport.acknowledge_all();

    let hit = ChangeEvent::new(
        "messages",
        ChangeKind::Insert,
        json!({"conversation_id": "c1", "body": "chapter 3 thoughts"}),
    );
    let miss = ChangeEvent::new(
        "messages",
        ChangeKind::Insert,
        json!({"conversation_id": "c2", "body": "other club"}),
    );
    assert_eq!(transport.publish(&hit), 1);
    assert_eq!(transport.publish(&miss), 0);
    client.process_pending();

    assert_eq!(*received.lock(), vec![json!("chapter 3 thoughts")]);
}

// --- Channel failure and backoff ---

#[test]
fn test_channel_error_schedules_reconnect_with_original_predicate() {
    let (client, transport, timer) = setup();
    let calls = Calls::default();
    let id = client.subscribe(calls.wire(conversation("c1"))).unwrap();

    fail_channel(&client, &transport, &id);

    assert_eq!(client.get_status(&id), Some(SubscriptionStatus::Error));
    assert_eq!(
        *calls.errors.lock(),
        vec![RealtimeError::Channel(ChannelStatus::ChannelError)]
    );
    assert_eq!(timer.pending_delays(), vec![ms(2000)]);

    timer.advance(ms(2000));
    client.process_pending();

    let opened = transport.opened();
    assert_eq!(opened.len(), 2);
    assert_eq!(opened[1].binding.predicate, opened[0].binding.predicate);
    assert_eq!(
        opened[1].binding.predicate.pairs(),
        &[("conversation_id".to_string(), "c1".to_string())]
    );
    assert!(!transport.is_open(opened[0].handle));
    assert_eq!(*calls.reconnects.lock(), vec![1]);

    // Still degraded until the new channel confirms.
    assert_eq!(client.get_status(&id), Some(SubscriptionStatus::Error));
    transport.emit_status(&id, ChannelStatus::Subscribed);
    client.process_pending();
    assert_eq!(client.get_status(&id), Some(SubscriptionStatus::Subscribed));
    assert!(client.last_error(&id).is_none());
}

#[test]
fn test_timed_out_is_treated_as_failure() {
    let (client, transport, timer) = setup();
    let id = client.subscribe(conversation("c1")).unwrap();

    transport.emit_status(&id, ChannelStatus::TimedOut);
    client.process_pending();

    assert_eq!(client.get_status(&id), Some(SubscriptionStatus::Error));
    assert_eq!(
        client.last_error(&id),
        Some(RealtimeError::Channel(ChannelStatus::TimedOut))
    );
    assert_eq!(timer.pending_count(), 1);
}

#[test]
fn test_backoff_sequence_and_exhaustion() {
    let (client, transport, timer) = setup();
    let calls = Calls::default();
    let id = client.subscribe(calls.wire(conversation("c1"))).unwrap();

    let expected = [2000, 3000, 4500, 6750, 10125];
    for (i, delay) in expected.iter().enumerate() {
        fail_channel(&client, &transport, &id);
        assert_eq!(timer.pending_delays(), vec![ms(*delay)], "attempt {}", i + 1);

        let retrying = client.last_error(&id).unwrap();
        assert!(retrying.is_recoverable());

        timer.advance(ms(*delay));
        client.process_pending();
        assert_eq!(client.reconnect_attempts(&id), i as u32 + 1);
    }

    // Sixth failure: no timer, no reconnect.
    fail_channel(&client, &transport, &id);

    let gave_up = client.last_error(&id).unwrap();
    assert_eq!(gave_up, RealtimeError::ReconnectExhausted(5));
    assert!(!gave_up.is_recoverable());
    assert_eq!(
        client.subscription_info(&id).unwrap().last_error.as_deref(),
        Some("Reconnection gave up after 5 attempts")
    );

    assert_eq!(timer.pending_count(), 0);
    assert_eq!(
        timer.scheduled_delays(),
        expected.iter().map(|d| ms(*d)).collect::<Vec<_>>()
    );
    assert_eq!(*calls.reconnects.lock(), vec![1, 2, 3, 4, 5]);
    assert_eq!(calls.errors.lock().len(), 6);
    assert_eq!(transport.open_count(), 6);
    assert_eq!(client.get_status(&id), Some(SubscriptionStatus::Error));

    // Further failures stay quiet.
    fail_channel(&client, &transport, &id);
    timer.advance(ms(60_000));
    client.process_pending();
    assert_eq!(transport.open_count(), 6);
    assert_eq!(*calls.reconnects.lock(), vec![1, 2, 3, 4, 5]);
    assert_eq!(client.last_error(&id), Some(RealtimeError::ReconnectExhausted(5)));
}

#[test]
fn test_success_resets_backoff() {
    let (client, transport, timer) = setup();
    let id = client.subscribe(conversation("c1")).unwrap();

    fail_channel(&client, &transport, &id);
    timer.advance(ms(2000));
    client.process_pending();
    fail_channel(&client, &transport, &id);
    assert_eq!(timer.pending_delays(), vec![ms(3000)]);
    timer.advance(ms(3000));
    client.process_pending();

    transport.emit_status(&id, ChannelStatus::Subscribed);
    client.process_pending();
    assert_eq!(client.reconnect_attempts(&id), 0);

    fail_channel(&client, &transport, &id);
    assert_eq!(timer.pending_delays(), vec![ms(2000)]);
}

#[test]
fn test_repeated_error_on_same_channel_keeps_one_timer() {
    let (client, transport, timer) = setup();
    let id = client.subscribe(conversation("c1")).unwrap();

    fail_channel(&client, &transport, &id);
    fail_channel(&client, &transport, &id);

    assert_eq!(timer.pending_delays(), vec![ms(2000)]);
    assert_eq!(client.reconnect_attempts(&id), 1);
}

#[test]
fn test_open_failure_is_reported_not_thrown() {
    let (client, transport, timer) = setup();
    let calls = Calls::default();
    transport.fail_next_open("socket refused");

    let id = client.subscribe(calls.wire(conversation("c1"))).unwrap();

    assert_eq!(client.get_status(&id), Some(SubscriptionStatus::Error));
    assert_eq!(
        *calls.errors.lock(),
        vec![RealtimeError::Transport("socket refused".to_string())]
    );
    assert_eq!(timer.pending_delays(), vec![ms(2000)]);

    timer.advance(ms(2000));
    client.process_pending();
    assert_eq!(transport.open_count(), 1);
    assert_eq!(*calls.reconnects.lock(), vec![1]);
}

// --- Unsubscribe ---

#[test]
fn test_unsubscribe_cancels_reconnection() {
    let (client, transport, timer) = setup();
    let id = client.subscribe(conversation("c1")).unwrap();
    fail_channel(&client, &transport, &id);
    let token = timer.pending_tokens()[0];
    let handle = transport.latest_channel(&id).unwrap().handle;

    assert!(client.unsubscribe(&id));

    assert_eq!(client.get_status(&id), None);
    assert_eq!(timer.cancelled_tokens(), vec![token]);
    assert_eq!(transport.live_count(), 0);
    assert_eq!(transport.closed(), vec![handle]);

    // The timer beat the cancellation: firing must be a no-op.
    assert!(timer.force_fire(token));
    client.process_pending();
    assert_eq!(transport.open_count(), 1);
    assert_eq!(client.subscription_count(), 0);
}

#[test]
fn test_resubscribe_after_unsubscribe_creates_fresh_entry() {
    let (client, transport, _timer) = setup();
    let id = client.subscribe(conversation("c1")).unwrap();
    transport.acknowledge_all();
    client.process_pending();

    client.unsubscribe(&id);
    let again = client.subscribe(conversation("c1")).unwrap();

    assert_eq!(id, again);
    assert_eq!(transport.open_count(), 2);
    assert_eq!(client.get_status(&again), Some(SubscriptionStatus::Pending));
}

#[test]
fn test_status_from_unsubscribed_channel_is_ignored() {
    let (client, transport, timer) = setup();
    let id = client.subscribe(conversation("c1")).unwrap();
    let old = transport.latest_channel(&id).unwrap().handle;

    client.unsubscribe(&id);
    client.subscribe(conversation("c1")).unwrap();

    transport.emit_status_on(old, ChannelStatus::ChannelError);
    client.process_pending();

    assert_eq!(client.get_status(&id), Some(SubscriptionStatus::Pending));
    assert_eq!(timer.pending_count(), 0);
}

#[test]
fn test_unsubscribe_all() {
    let (client, transport, timer) = setup();

    assert_eq!(client.unsubscribe_all(), 0);

    let c1 = client.subscribe(conversation("c1")).unwrap();
    client.subscribe(conversation("c2")).unwrap();
    fail_channel(&client, &transport, &c1);
    transport.emit_system("CONNECTED");
    transport.emit_system("DISCONNECTED");
    client.process_pending();
    assert_eq!(timer.pending_count(), 2);

    assert_eq!(client.unsubscribe_all(), 2);

    assert_eq!(client.subscription_count(), 0);
    assert_eq!(transport.live_count(), 0);
    assert_eq!(timer.pending_count(), 0);
}

// --- Handler isolation ---

#[test]
fn test_failing_change_handler_is_isolated() {
    let (client, transport, _timer) = setup();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let error_sink = Arc::clone(&errors);
    let healthy = Arc::new(AtomicUsize::new(0));
    let healthy_count = Arc::clone(&healthy);

    let broken = client
        .subscribe(
            SubscriptionConfig::new("club_events")
                .on_change(|_| Err("bad payload".into()))
                .on_error(move |_, err| error_sink.lock().push(err.clone())),
        )
        .unwrap();
    let panicky = client
        .subscribe(SubscriptionConfig::new("rsvps").on_change(|_| panic!("handler bug")))
        .unwrap();
    let fine = client
        .subscribe(SubscriptionConfig::new("messages").on_change(move |_| {
            healthy_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();
    transport.acknowledge_all();
    client.process_pending();

    for table in ["club_events", "rsvps", "messages"] {
        transport.publish(&ChangeEvent::new(table, ChangeKind::Update, json!({"id": 1})));
    }
    client.process_pending();

    assert_eq!(
        *errors.lock(),
        vec![RealtimeError::Callback("bad payload".to_string())]
    );
    assert_eq!(healthy.load(Ordering::SeqCst), 1);
    for id in [&broken, &panicky, &fine] {
        assert_eq!(client.get_status(id), Some(SubscriptionStatus::Subscribed));
    }
}

#[test]
fn test_handlers_may_call_back_into_client() {
    let (client, transport, _timer) = setup();
    let weak = Arc::downgrade(&client);

    let id = client
        .subscribe(SubscriptionConfig::new("messages").on_change(move |change| {
            if let Some(client) = weak.upgrade() {
                let id = SubscriptionId("messages:*".to_string());
                assert_eq!(change.table, "messages");
                client.unsubscribe(&id);
            }
            Ok(())
        }))
        .unwrap();
    transport.acknowledge_all();
    transport.publish(&ChangeEvent::new("messages", ChangeKind::Insert, json!({})));
    client.process_pending();

    assert_eq!(client.get_status(&id), None);
}

// --- Diagnostics ---

#[test]
fn test_list_subscriptions() {
    let (client, transport, _timer) = setup();
    let c2 = client.subscribe(conversation("c2")).unwrap();
    let c1 = client.subscribe(conversation("c1")).unwrap();
    fail_channel(&client, &transport, &c2);

    let infos = client.list_subscriptions();

    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].id, c1);
    assert_eq!(infos[0].status, SubscriptionStatus::Pending);
    assert_eq!(infos[1].id, c2);
    assert_eq!(infos[1].status, SubscriptionStatus::Error);
    assert_eq!(infos[1].reconnect_attempts, 1);
    assert_eq!(infos[1].retry_delay_ms, Some(2000));
    assert_eq!(infos[0].retry_delay_ms, None);
    assert_eq!(infos[1].last_error.as_deref(), Some("Channel reported CHANNEL_ERROR"));

    let json = serde_json::to_value(&infos[1]).unwrap();
    assert_eq!(json["status"], "ERROR");
    assert_eq!(json["event"], "INSERT");
}
