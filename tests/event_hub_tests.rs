//! Integration tests for the event hub: sequencing, replay, backpressure.

use nexus3::EventHub;
use serde_json::json;

#[test]
fn test_sequence_numbering_and_replay_window() {
    let hub = EventHub::new(100, 5, 10);
    for i in 1..=7 {
        hub.publish("a", &json!({"type": format!("e{}", i)}));
    }

    // The ring keeps the 5 newest events; seq keeps counting past them.
    let events = hub.get_events_since("a", 0);
    let seqs: Vec<u64> = events.iter().map(|e| e["seq"].as_u64().unwrap()).collect();
    assert_eq!(seqs, vec![3, 4, 5, 6, 7]);
    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["e3", "e4", "e5", "e6", "e7"]);
    assert_eq!(hub.latest_seq("a"), 7);
}

#[test]
fn test_slow_subscriber_eviction() {
    let hub = EventHub::new(1, 100, 3);
    let sub = hub.subscribe("a");

    // Publish 4 events without consuming: 1 delivered, 3 consecutive drops.
    for _ in 0..4 {
        hub.publish("a", &json!({"type": "tick"}));
    }

    assert!(!hub.is_subscribed("a", &sub));
    assert_eq!(hub.subscriber_count("a"), 0);
    assert!(!hub.has_subscribers("a"));
    assert_eq!(hub.total_subscriber_count(), 0);
}

#[test]
fn test_publish_does_not_mutate_caller_event() {
    let hub = EventHub::default();
    let event = json!({"type": "x"});
    hub.publish("a", &event);
    assert!(event.get("seq").is_none());
}

#[test]
fn test_replay_since_latest_is_empty() {
    let hub = EventHub::default();
    for _ in 0..3 {
        hub.publish("a", &json!({"type": "tick"}));
    }
    assert!(hub.get_events_since("a", hub.latest_seq("a")).is_empty());
}

#[test]
fn test_subscribe_unsubscribe_roundtrip() {
    let hub = EventHub::default();
    assert_eq!(hub.total_subscriber_count(), 0);

    let sub_a = hub.subscribe("a");
    let sub_b = hub.subscribe("a");
    assert_eq!(hub.subscriber_count("a"), 2);
    assert_eq!(hub.total_subscriber_count(), 2);

    hub.unsubscribe("a", &sub_a);
    assert_eq!(hub.subscriber_count("a"), 1);
    hub.unsubscribe("a", &sub_b);
    assert_eq!(hub.subscriber_count("a"), 0);
    assert_eq!(hub.total_subscriber_count(), 0);

    // Unknown unsubscribe is a no-op.
    hub.unsubscribe("a", &sub_a);
    hub.unsubscribe("never-existed", &sub_b);
}

#[test]
fn test_publish_without_subscribers_still_advances_seq() {
    let hub = EventHub::default();
    assert_eq!(hub.publish("quiet", &json!({"type": "e"})), 1);
    assert_eq!(hub.publish("quiet", &json!({"type": "e"})), 2);
    assert_eq!(hub.latest_seq("quiet"), 2);
    assert_eq!(hub.get_events_since("quiet", 0).len(), 2);
}

#[tokio::test]
async fn test_all_subscribers_see_events_in_seq_order() {
    let hub = EventHub::default();
    let mut subs = vec![hub.subscribe("a"), hub.subscribe("a"), hub.subscribe("a")];
    for i in 0..10 {
        hub.publish("a", &json!({"type": format!("e{}", i)}));
    }
    for sub in subs.iter_mut() {
        let mut last = 0;
        while let Some(event) = sub.try_recv() {
            let seq = event["seq"].as_u64().unwrap();
            assert_eq!(seq, last + 1, "gap or reorder observed");
            last = seq;
        }
        assert_eq!(last, 10);
    }
}

#[test]
fn test_agents_are_independent() {
    let hub = EventHub::default();
    hub.publish("a", &json!({"type": "e"}));
    hub.publish("b", &json!({"type": "e"}));
    hub.publish("b", &json!({"type": "e"}));
    assert_eq!(hub.latest_seq("a"), 1);
    assert_eq!(hub.latest_seq("b"), 2);
    assert_eq!(hub.latest_seq("c"), 0);
}

#[test]
fn test_queue_boundary_drop_behavior() {
    // Queue depth exactly max_queue_size: the next publish drops, the one
    // after that drops again, and the drop counter only evicts at the limit.
    let hub = EventHub::new(2, 100, 10);
    let mut sub = hub.subscribe("a");
    hub.publish("a", &json!({"type": "e1"}));
    hub.publish("a", &json!({"type": "e2"}));
    // Queue is full now; these two drop.
    hub.publish("a", &json!({"type": "e3"}));
    hub.publish("a", &json!({"type": "e4"}));
    assert!(hub.is_subscribed("a", &sub));

    let received: Vec<String> = std::iter::from_fn(|| sub.try_recv())
        .map(|e| e["type"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(received, vec!["e1", "e2"]);
}
