//! Change notification tests.

use pollstore::{
    ChangeKind, DropReason, EventKind, MemoryBackend, Store, StoreConfig, StoreEvent,
    SubscriptionConfig, SubscriptionFilter,
};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// --- Delivery ---

#[test]
fn test_one_event_per_row_in_order() {
    let store = Store::in_memory().unwrap();
    let all = store.subscribe(SubscriptionFilter::table("poll_options"));

    store
        .from("poll_options")
        .insert(json!([
            {"poll_id": "p", "title": "A"},
            {"poll_id": "p", "title": "B"},
            {"poll_id": "p", "title": "C"},
        ]))
        .unwrap();
    store
        .from("poll_options")
        .eq("title", "B")
        .update(json!({"votes_count": 1}))
        .unwrap();
    store.from("poll_options").neq("title", "B").delete().unwrap();

    let events = all.drain_changes();
    let summary: Vec<(ChangeKind, &str)> = events
        .iter()
        .map(|e| (e.kind, e.record.str_field("title").unwrap_or_default()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (ChangeKind::Insert, "A"),
            (ChangeKind::Insert, "B"),
            (ChangeKind::Insert, "C"),
            (ChangeKind::Update, "B"),
            (ChangeKind::Delete, "A"),
            (ChangeKind::Delete, "C"),
        ]
    );
    assert!(events.iter().all(|e| e.table == "poll_options"));
}

#[test]
fn test_wildcard_and_specific_subscribers() {
    let store = Store::in_memory().unwrap();
    let everything = store.subscribe(SubscriptionFilter::table("votes").event(EventKind::All));
    let inserts = store.subscribe(SubscriptionFilter::table("votes").event(EventKind::Insert));
    let deletes = store.subscribe(SubscriptionFilter::table("votes").event(EventKind::Delete));
    let other_table = store.subscribe(SubscriptionFilter::table("polls"));

    store
        .from("votes")
        .insert(json!({"poll_id": "1", "user_id": "u", "option_id": "a"}))
        .unwrap();
    store.from("votes").eq("user_id", "u").delete().unwrap();

    assert_eq!(everything.drain_changes().len(), 2);
    let inserted = inserts.drain_changes();
    assert_eq!(inserted.len(), 1);
    assert_eq!(inserted[0].kind, ChangeKind::Insert);
    let deleted = deletes.drain_changes();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].record.str_field("user_id"), Some("u"));
    assert!(other_table.drain().is_empty());
}

#[test]
fn test_no_events_for_changes_before_subscribing() {
    let store = Store::in_memory().unwrap();
    store.from("notes").insert(json!({"text": "early"})).unwrap();

    let late = store.subscribe(SubscriptionFilter::table("notes"));
    assert!(late.drain().is_empty());

    store.from("notes").insert(json!({"text": "late"})).unwrap();
    assert_eq!(late.drain_changes().len(), 1);
}

#[test]
fn test_failed_mutation_publishes_nothing() {
    let store = Store::in_memory().unwrap();
    let sub = store.subscribe(SubscriptionFilter::table("votes"));

    store
        .from("votes")
        .insert(json!({"poll_id": "1", "user_id": "u", "option_id": "a"}))
        .unwrap();
    sub.drain();

    assert!(store
        .from("votes")
        .insert(json!({"poll_id": "1", "user_id": "u", "option_id": "b"}))
        .is_err());
    assert!(sub.drain().is_empty());
}

#[test]
fn test_row_filter() {
    let store = Store::in_memory().unwrap();
    let poll_one = store.subscribe(SubscriptionFilter::table("poll_options").row_eq("poll_id", "1"));

    store
        .from("poll_options")
        .insert(json!([
            {"poll_id": "1", "title": "A"},
            {"poll_id": "2", "title": "B"},
        ]))
        .unwrap();

    let events = poll_one.drain_changes();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].record.str_field("title"), Some("A"));
}

#[test]
fn test_row_filter_on_numeric_id() {
    let store = Store::in_memory().unwrap();
    let poll_one = store.subscribe(SubscriptionFilter::table("polls").row_eq("id", 1));

    store
        .from("polls")
        .eq("id", 1)
        .update(json!({"is_resolved": true}))
        .unwrap();

    let events = poll_one.drain_changes();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ChangeKind::Update);
}

#[test]
fn test_delete_event_carries_removed_row() {
    let store = Store::in_memory().unwrap();
    let sub = store.subscribe(SubscriptionFilter::table("activities").event(EventKind::Delete));

    assert_eq!(store.from("activities").eq("id", "2").delete().unwrap(), 1);

    let events = sub.drain_changes();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].record.id.as_str(), "2");
    assert_eq!(events[0].record.str_field("title"), Some("Tech Talk"));
    assert!(events[0].old.is_none());
}

// --- Lifecycle ---

#[test]
fn test_unsubscribe_isolates_other_subscribers() {
    let store = Store::in_memory().unwrap();
    let a = store.subscribe(SubscriptionFilter::table("notes"));
    let b = store.subscribe(SubscriptionFilter::table("notes"));

    assert!(store.unsubscribe(a.id));
    assert!(!store.unsubscribe(a.id));

    store.from("notes").insert(json!({"text": "hi"})).unwrap();

    let a_events = a.drain();
    assert_eq!(a_events.len(), 1);
    assert!(matches!(
        a_events[0],
        StoreEvent::Dropped {
            reason: DropReason::Unsubscribed
        }
    ));
    assert_eq!(b.drain_changes().len(), 1);
}

#[test]
fn test_large_batch_keeps_subscriber() {
    let store = Store::in_memory().unwrap();
    let sub = store.subscribe(SubscriptionFilter::table("notes"));

    let rows: Vec<_> = (0..3000).map(|n| json!({"n": n})).collect();
    store.from("notes").insert(rows).unwrap();

    assert_eq!(sub.drain_changes().len(), 3000);
    assert_eq!(store.stats().unwrap().subscription_count, 1);

    // Still registered for the next mutation.
    store.from("notes").insert(json!({"n": "after"})).unwrap();
    assert_eq!(sub.drain_changes().len(), 1);
}

#[test]
fn test_configured_buffer_applies_to_store_subscriptions() {
    let store = Store::with_backend(
        StoreConfig {
            subscription_buffer_size: Some(4),
            ..Default::default()
        },
        Arc::new(MemoryBackend::new()),
    )
    .unwrap();
    let capped = store.subscribe(SubscriptionFilter::table("notes"));

    let rows: Vec<_> = (0..10).map(|n| json!({"n": n})).collect();
    store.from("notes").insert(rows).unwrap();

    assert_eq!(capped.drain_changes().len(), 4);
    assert_eq!(store.stats().unwrap().subscription_count, 0);
}

#[test]
fn test_slow_subscriber_is_dropped() {
    let store = Store::in_memory().unwrap();
    let slow =
        store.subscribe_with(SubscriptionConfig::new(SubscriptionFilter::table("notes")).bounded(2));
    let fast = store.subscribe(SubscriptionFilter::table("notes"));

    for i in 0..5 {
        store.from("notes").insert(json!({"n": i})).unwrap();
    }

    assert_eq!(slow.drain_changes().len(), 2);
    assert_eq!(fast.drain_changes().len(), 5);
    assert_eq!(store.stats().unwrap().subscription_count, 1);
}

#[test]
fn test_dropped_handle_is_cleaned_up() {
    let store = Store::in_memory().unwrap();
    let sub = store.subscribe(SubscriptionFilter::table("notes"));
    drop(sub);

    store.from("notes").insert(json!({"text": "x"})).unwrap();
    assert_eq!(store.stats().unwrap().subscription_count, 0);
}

#[test]
fn test_events_cross_threads() {
    let store = Arc::new(Store::in_memory().unwrap());
    let sub = store.subscribe(SubscriptionFilter::table("votes").event(EventKind::Insert));

    let writers: Vec<_> = (0..4)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store
                    .from("votes")
                    .insert(json!({"poll_id": "1", "user_id": format!("u{i}"), "option_id": "a"}))
                    .unwrap();
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let mut seen = 0;
    while let Ok(event) = sub.recv_timeout(Duration::from_millis(100)) {
        assert!(event.change().is_some());
        seen += 1;
    }
    assert_eq!(seen, 4);
    assert_eq!(store.from("votes").count().unwrap(), 4);
}
