// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use amon_core::EventKind;

fn bus_with(buffer: usize, dedupe_window_s: u64) -> EventBus {
    EventBus::new(BusConfig { buffer, dedupe_window_s })
}

fn event(kind: EventKind) -> Event {
    Event::new(kind)
}

#[tokio::test]
async fn subscriber_receives_matching_events() {
    let bus = bus_with(16, 30);
    let sub = bus.subscribe(|e| e.kind.family() == "run");

    bus.publish(event(EventKind::RunStarted));
    bus.publish(event(EventKind::NodeStarted));
    bus.publish(event(EventKind::RunCompleted));

    assert_eq!(sub.recv().await.kind, EventKind::RunStarted);
    assert_eq!(sub.recv().await.kind, EventKind::RunCompleted);
    assert!(sub.is_empty());
}

#[tokio::test]
async fn overflow_drops_oldest_and_counts() {
    let bus = bus_with(2, 30);
    let sub = bus.subscribe(|_| true);

    bus.publish(event(EventKind::RunStarted));
    bus.publish(event(EventKind::NodeStarted));
    bus.publish(event(EventKind::RunCompleted));

    assert_eq!(bus.dropped_count(), 1);
    assert_eq!(sub.len(), 2);
    // Oldest was dropped
    assert_eq!(sub.recv().await.kind, EventKind::NodeStarted);
    assert_eq!(sub.recv().await.kind, EventKind::RunCompleted);
}

#[tokio::test]
async fn dedupe_leading_edge_passes_then_coalesces() {
    let bus = bus_with(16, 30);
    let sub = bus.subscribe(|_| true);

    let mut first = event(EventKind::DocUpdated);
    first.dedupe_key = Some("docs/a.md".into());
    first.payload = serde_json::json!(1);
    bus.publish(first);

    for i in 2..=4 {
        let mut again = event(EventKind::DocUpdated);
        again.dedupe_key = Some("docs/a.md".into());
        again.payload = serde_json::json!(i);
        bus.publish(again);
    }

    // Leading edge delivered immediately
    assert_eq!(sub.recv().await.payload, serde_json::json!(1));
    assert!(sub.is_empty());

    // Window close delivers only the latest
    bus.flush_dedupe(Instant::now() + Duration::from_secs(31));
    assert_eq!(sub.recv().await.payload, serde_json::json!(4));
    assert!(sub.is_empty());
}

#[tokio::test]
async fn different_dedupe_keys_do_not_coalesce() {
    let bus = bus_with(16, 30);
    let sub = bus.subscribe(|_| true);

    for key in ["a", "b"] {
        let mut e = event(EventKind::DocUpdated);
        e.dedupe_key = Some(key.into());
        bus.publish(e);
    }
    assert_eq!(sub.len(), 2);
}

#[tokio::test]
async fn dropped_subscription_detaches() {
    let bus = bus_with(16, 30);
    let sub = bus.subscribe(|_| true);
    drop(sub);

    bus.publish(event(EventKind::RunStarted));
    // Publish after drop reaches nobody and counts no drops
    assert_eq!(bus.dropped_count(), 0);
    assert_eq!(bus.queue_depth(), 0);
}

#[tokio::test]
async fn queue_depth_reflects_buffered() {
    let bus = bus_with(16, 30);
    let _sub = bus.subscribe(|_| true);
    bus.publish(event(EventKind::RunStarted));
    bus.publish(event(EventKind::RunCompleted));
    assert_eq!(bus.queue_depth(), 2);
}
