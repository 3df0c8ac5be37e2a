//! Event dispatcher
//!
//! Owns the ring: publishers go through the producer side behind a mutex
//! (the execution core serializes its venue bridges on top of that), a
//! single consumer thread pops events and invokes subscribers in
//! registration order. Handlers are result-carrying; a failing handler is
//! logged and does not affect its siblings.

use common::config::DispatcherConfig;
use common::error::{DropReason, PublishOutcome};
use common::events::{Event, EventKind, SystemEvent};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::ring::{spsc, Consumer, Producer};

/// Subscriber callback; an `Err` is logged and counted, siblings still run
pub type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Opaque subscription token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Length of the drop-rate observation window
const DEGRADED_WINDOW: Duration = Duration::from_secs(10);
/// Backstop wait so a missed notify cannot stall the consumer
const IDLE_WAIT: Duration = Duration::from_millis(50);

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped_full: AtomicU64,
    dropped_not_running: AtomicU64,
    handler_errors: AtomicU64,
}

/// Snapshot of dispatcher counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Events accepted by `publish`
    pub published: u64,
    /// Handler invocations that returned Ok
    pub delivered: u64,
    /// Publishes dropped on a full ring
    pub dropped_full: u64,
    /// Publishes dropped while stopped
    pub dropped_not_running: u64,
    /// Handler invocations that returned Err
    pub handler_errors: u64,
}

struct DropWindow {
    started: Instant,
    drops: u64,
    signalled: bool,
}

struct Shared {
    producer: Mutex<Producer<Event>>,
    consumer_slot: Mutex<Option<Consumer<Event>>>,
    running: AtomicBool,
    wake_lock: Mutex<()>,
    wake: Condvar,
    subscribers: Mutex<FxHashMap<EventKind, Vec<(SubscriptionId, Handler)>>>,
    next_subscription: AtomicU64,
    counters: Counters,
    degraded_threshold: u64,
    drop_window: Mutex<DropWindow>,
    // Reserved slot for the Degraded notification so it bypasses the full ring
    reserved: Mutex<Option<Event>>,
}

/// Event dispatcher over the SPSC ring
pub struct EventDispatcher {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatcher {
    /// Build a stopped dispatcher with the configured ring capacity
    #[must_use]
    pub fn new(config: &DispatcherConfig) -> Self {
        let (producer, consumer) = spsc(config.buffer_size);
        Self {
            shared: Arc::new(Shared {
                producer: Mutex::new(producer),
                consumer_slot: Mutex::new(Some(consumer)),
                running: AtomicBool::new(false),
                wake_lock: Mutex::new(()),
                wake: Condvar::new(),
                subscribers: Mutex::new(FxHashMap::default()),
                next_subscription: AtomicU64::new(1),
                counters: Counters::default(),
                degraded_threshold: config.degraded_threshold.max(1),
                drop_window: Mutex::new(DropWindow {
                    started: Instant::now(),
                    drops: 0,
                    signalled: false,
                }),
                reserved: Mutex::new(None),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Start the consumer thread; idempotent
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let consumer = self
            .shared
            .consumer_slot
            .lock()
            .take()
            .expect("consumer handle present when stopped");
        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name("event-dispatcher".to_string())
            .spawn(move || consume(shared, consumer))
            .expect("spawn dispatcher thread");
        *self.thread.lock() = Some(handle);
        info!("event dispatcher started");
    }

    /// Stop the consumer thread; idempotent. Buffered events are drained
    /// before the thread exits; publishes after return are rejected.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.wake.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("dispatcher thread panicked during shutdown");
            }
        }
        info!("event dispatcher stopped");
    }

    /// Whether the consumer is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Non-blocking publish
    pub fn publish(&self, event: Event) -> PublishOutcome {
        if !self.is_running() {
            self.shared
                .counters
                .dropped_not_running
                .fetch_add(1, Ordering::Relaxed);
            return PublishOutcome::Dropped(DropReason::NotRunning);
        }
        let full = {
            let mut producer = self.shared.producer.lock();
            producer.push(event).is_err()
        };
        if full {
            self.shared
                .counters
                .dropped_full
                .fetch_add(1, Ordering::Relaxed);
            self.note_drop();
            return PublishOutcome::Dropped(DropReason::BufferFull);
        }
        self.shared.counters.published.fetch_add(1, Ordering::Relaxed);
        self.shared.wake.notify_one();
        PublishOutcome::Accepted
    }

    /// Register a handler for one event kind; takes effect from the next
    /// dispatched event
    pub fn subscribe(&self, kind: EventKind, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(
            self.shared
                .next_subscription
                .fetch_add(1, Ordering::Relaxed),
        );
        self.shared
            .subscribers
            .lock()
            .entry(kind)
            .or_default()
            .push((id, handler));
        debug!(kind = %kind, id = id.0, "subscriber registered");
        id
    }

    /// Remove a subscription; unknown tokens are ignored
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.shared.subscribers.lock();
        for handlers in subscribers.values_mut() {
            handlers.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Number of subscribers for one kind
    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.shared
            .subscribers
            .lock()
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        let c = &self.shared.counters;
        DispatcherStats {
            published: c.published.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            dropped_full: c.dropped_full.load(Ordering::Relaxed),
            dropped_not_running: c.dropped_not_running.load(Ordering::Relaxed),
            handler_errors: c.handler_errors.load(Ordering::Relaxed),
        }
    }

    fn note_drop(&self) {
        let mut window = self.shared.drop_window.lock();
        let now = Instant::now();
        if now.duration_since(window.started) > DEGRADED_WINDOW {
            window.started = now;
            window.drops = 0;
            window.signalled = false;
        }
        window.drops += 1;
        if !window.signalled && window.drops >= self.shared.degraded_threshold {
            window.signalled = true;
            let dropped = window.drops;
            drop(window);
            warn!(dropped, "publish drop rate over threshold, signalling degraded");
            *self.shared.reserved.lock() = Some(Event::System(SystemEvent::Degraded {
                dropped,
                window_secs: DEGRADED_WINDOW.as_secs(),
            }));
            self.shared.wake.notify_one();
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn consume(shared: Arc<Shared>, mut consumer: Consumer<Event>) {
    loop {
        // The reserved slot carries system degradation ahead of the backlog
        let staged = shared.reserved.lock().take();
        if let Some(event) = staged {
            dispatch(&shared, &event);
            continue;
        }

        match consumer.pop() {
            Some(event) => dispatch(&shared, &event),
            None => {
                if !shared.running.load(Ordering::Acquire) {
                    break;
                }
                let mut guard = shared.wake_lock.lock();
                if consumer.is_empty()
                    && shared.running.load(Ordering::Acquire)
                    && shared.reserved.lock().is_none()
                {
                    shared.wake.wait_for(&mut guard, IDLE_WAIT);
                }
            }
        }
    }
    // Final drain: events accepted before stop() still get delivered
    if let Some(event) = shared.reserved.lock().take() {
        dispatch(&shared, &event);
    }
    while let Some(event) = consumer.pop() {
        dispatch(&shared, &event);
    }
    *shared.consumer_slot.lock() = Some(consumer);
}

fn dispatch(shared: &Arc<Shared>, event: &Event) {
    // Snapshot under the lock, invoke outside it: handlers may subscribe or
    // unsubscribe, and those changes apply from the next event
    let handlers: Vec<(SubscriptionId, Handler)> = shared
        .subscribers
        .lock()
        .get(&event.kind())
        .cloned()
        .unwrap_or_default();
    for (id, handler) in handlers {
        match handler(event) {
            Ok(()) => {
                shared.counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                shared
                    .counters
                    .handler_errors
                    .fetch_add(1, Ordering::Relaxed);
                warn!(subscription = id.0, kind = %event.kind(), error = %e, "event handler failed");
            }
        }
    }
}
