// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process pub/sub with bounded buffers and dedupe coalescing.
//!
//! Publishing never blocks: a subscriber whose buffer is full loses its
//! oldest event and the bus-wide drop counter increments. The durable
//! EventLog is the recovery source; the bus is best-effort by design.

use amon_core::{BusConfig, Event};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

type Filter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

struct SubQueue {
    buf: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

struct SubEntry {
    filter: Filter,
    queue: Arc<SubQueue>,
}

struct Pending {
    latest: Option<Event>,
    window_until: Instant,
}

struct Inner {
    subscribers: Vec<SubEntry>,
    pending: HashMap<String, Pending>,
}

/// The shared bus handle.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
    dropped: Arc<AtomicU64>,
    config: BusConfig,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner { subscribers: Vec::new(), pending: HashMap::new() })),
            dropped: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    /// Subscribe with a filter predicate. Only matching events land in the
    /// returned subscription's buffer.
    pub fn subscribe(&self, filter: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Subscription {
        let queue = Arc::new(SubQueue {
            buf: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: self.config.buffer,
            closed: AtomicBool::new(false),
        });
        self.inner
            .lock()
            .subscribers
            .push(SubEntry { filter: Arc::new(filter), queue: Arc::clone(&queue) });
        Subscription { queue }
    }

    /// Non-blocking publish. Events with a dedupe key are coalesced: the
    /// first in a window is delivered immediately, later ones replace a
    /// pending "latest" that [`EventBus::flush_dedupe`] delivers when the
    /// window closes.
    pub fn publish(&self, event: Event) {
        let now = Instant::now();
        if let Some(key) = event.dedupe_key.clone() {
            let window = Duration::from_secs(self.config.dedupe_window_s);
            let mut inner = self.inner.lock();
            match inner.pending.get_mut(&key) {
                Some(pending) if now < pending.window_until => {
                    pending.latest = Some(event);
                    return;
                }
                _ => {
                    inner
                        .pending
                        .insert(key, Pending { latest: None, window_until: now + window });
                    Self::deliver(&mut inner, &self.dropped, event);
                    return;
                }
            }
        }
        let mut inner = self.inner.lock();
        Self::deliver(&mut inner, &self.dropped, event);
    }

    /// Deliver coalesced latest events whose window has closed. Called
    /// periodically by the daemon tick (and by tests directly).
    pub fn flush_dedupe(&self, now: Instant) {
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .pending
            .iter()
            .filter(|(_, p)| now >= p.window_until)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            if let Some(pending) = inner.pending.remove(&key) {
                if let Some(event) = pending.latest {
                    Self::deliver(&mut inner, &self.dropped, event);
                }
            }
        }
    }

    fn deliver(inner: &mut Inner, dropped: &AtomicU64, event: Event) {
        inner.subscribers.retain(|s| !s.queue.closed.load(Ordering::Relaxed));
        for sub in &inner.subscribers {
            if !(sub.filter)(&event) {
                continue;
            }
            let mut buf = sub.queue.buf.lock();
            if buf.len() >= sub.queue.capacity {
                buf.pop_front();
                dropped.fetch_add(1, Ordering::Relaxed);
            }
            buf.push_back(event.clone());
            drop(buf);
            sub.queue.notify.notify_one();
        }
    }

    /// Total events dropped across all subscribers since startup.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Current number of buffered events across subscribers (health metric).
    pub fn queue_depth(&self) -> usize {
        let inner = self.inner.lock();
        inner.subscribers.iter().map(|s| s.queue.buf.lock().len()).sum()
    }
}

/// Receiving side of a bus subscription. Dropping it detaches from the bus.
pub struct Subscription {
    queue: Arc<SubQueue>,
}

impl Subscription {
    /// Wait for the next event.
    pub async fn recv(&self) -> Event {
        loop {
            if let Some(event) = self.queue.buf.lock().pop_front() {
                return event;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Pop without waiting.
    pub fn try_recv(&self) -> Option<Event> {
        self.queue.buf.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.buf.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.buf.lock().is_empty()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.closed.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
