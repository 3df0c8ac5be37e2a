//! Execution core
//!
//! Owns the dispatcher, risk engine and router, and bridges each venue's
//! adapter event stream into the pipeline. Every adapter stream gets its
//! own pump thread; all pumps publish through one lock so the ring stays
//! strictly single-producer.

use crate::risk::RiskEngine;
use crate::router::OrderRouter;
use crate::venue::{AdapterEvent, VenueAdapter};
use bus::dispatcher::{EventDispatcher, Handler, SubscriptionId};
use common::config::{DispatcherConfig, RiskLimits};
use common::error::EngineError;
use common::events::{Event, EventKind, SystemEvent};
use common::types::{MarketData, Order, OrderId, OrderStatus};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Market data callback installed by a strategy
pub type MdCallback = Arc<dyn Fn(&MarketData) + Send + Sync>;

/// Token for one market data subscription; pass back to unsubscribe
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MdSubscription {
    symbol: String,
    venue: String,
    token: u64,
}

/// Order submission seam strategies hold a weak reference to
pub trait OrderGateway: Send + Sync {
    /// Submit an order to a venue through the risk gate
    fn submit(&self, order: &Order, venue: &str) -> Result<OrderId, EngineError>;
    /// Cancel an order on a venue
    fn cancel(&self, order_id: &OrderId, venue: &str) -> Result<(), EngineError>;
}

type MdCallbackTable = Arc<Mutex<FxHashMap<(String, String), Vec<(u64, MdCallback)>>>>;

/// The execution core
pub struct ExecutionCore {
    dispatcher: EventDispatcher,
    risk: Arc<RiskEngine>,
    router: Arc<OrderRouter>,
    publish_lock: Mutex<()>,
    md_callbacks: MdCallbackTable,
    next_md_token: AtomicU64,
    pumps: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl ExecutionCore {
    /// Build a core with the given dispatcher settings and risk limits
    #[must_use]
    pub fn new(dispatcher_config: &DispatcherConfig, limits: RiskLimits) -> Arc<Self> {
        let risk = Arc::new(RiskEngine::new(limits));
        let router = Arc::new(OrderRouter::new(risk.clone()));
        let dispatcher = EventDispatcher::new(dispatcher_config);

        let md_callbacks: MdCallbackTable = Arc::new(Mutex::new(FxHashMap::default()));

        // Core-owned fanout from market data events to per-(symbol, venue)
        // strategy callbacks
        let table = md_callbacks.clone();
        dispatcher.subscribe(
            EventKind::MarketData,
            Arc::new(move |event: &Event| {
                if let Event::MarketData { venue, data } = event {
                    let callbacks: Vec<MdCallback> = table
                        .lock()
                        .get(&(data.symbol.clone(), venue.clone()))
                        .map(|entries| entries.iter().map(|(_, cb)| cb.clone()).collect())
                        .unwrap_or_default();
                    for callback in callbacks {
                        callback(data);
                    }
                }
                Ok(())
            }) as Handler,
        );

        // Day rollover resets the risk daily baseline
        let daily_risk = risk.clone();
        dispatcher.subscribe(
            EventKind::System,
            Arc::new(move |event: &Event| {
                if matches!(event, Event::System(SystemEvent::DayRollover)) {
                    daily_risk.reset_daily();
                }
                Ok(())
            }) as Handler,
        );

        Arc::new(Self {
            dispatcher,
            risk,
            router,
            publish_lock: Mutex::new(()),
            md_callbacks,
            next_md_token: AtomicU64::new(1),
            pumps: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Register a venue adapter: wires its event sink and spawns the pump
    /// thread that bridges its stream into the dispatcher
    pub fn register_venue(self: &Arc<Self>, adapter: Arc<dyn VenueAdapter>) {
        let name = adapter.name().to_string();
        let (tx, rx) = crossbeam::channel::unbounded::<AdapterEvent>();
        adapter.set_event_sink(tx);
        self.router.register_venue(name.clone(), adapter);

        let weak: Weak<Self> = Arc::downgrade(self);
        let venue = name.clone();
        let handle = std::thread::Builder::new()
            .name(format!("venue-pump-{name}"))
            .spawn(move || {
                for event in rx {
                    let Some(core) = weak.upgrade() else { break };
                    core.bridge(&venue, event);
                }
                debug!(venue = %venue, "venue pump exited");
            })
            .expect("spawn venue pump");
        self.pumps.lock().push(handle);
    }

    /// Bridge one adapter event into the pipeline. Serialized by the
    /// publish lock so the ring sees a single producer.
    fn bridge(&self, venue: &str, event: AdapterEvent) {
        let _guard = self.publish_lock.lock();
        let outcome = match event {
            AdapterEvent::MarketData(data) => {
                self.router.record_mark(venue, &data.symbol, data.last_price);
                self.dispatcher.publish(Event::MarketData {
                    venue: venue.to_string(),
                    data,
                })
            }
            AdapterEvent::TradeUpdate(update) => {
                self.risk.on_fill(&update);
                self.dispatcher.publish(Event::TradeUpdate {
                    venue: venue.to_string(),
                    update,
                })
            }
            AdapterEvent::OrderUpdate(update) => {
                self.router.on_order_update(&update);
                self.dispatcher.publish(Event::OrderUpdate {
                    venue: venue.to_string(),
                    update,
                })
            }
            AdapterEvent::Fatal { reason } => {
                error!(venue, reason = %reason, "venue fatal, unregistering");
                if let Some(adapter) = self.router.unregister_venue(venue) {
                    if let Err(e) = adapter.disconnect() {
                        warn!(venue, error = %e, "disconnect after fatal failed");
                    }
                }
                self.dispatcher.publish(Event::System(SystemEvent::VenueFatal {
                    venue: venue.to_string(),
                    reason,
                }))
            }
        };
        if !outcome.is_accepted() {
            debug!(venue, ?outcome, "bridge publish dropped");
        }
    }

    /// Subscribe a callback to market data for `(symbol, venue)`
    ///
    /// The adapter-level subscription is taken on first demand and
    /// reference-counted per `(symbol, venue)`.
    pub fn subscribe_market_data(
        &self,
        symbol: &str,
        venue: &str,
        callback: MdCallback,
    ) -> Result<MdSubscription, EngineError> {
        let adapter = self
            .router
            .venue(venue)
            .ok_or_else(|| EngineError::UnknownVenue(venue.to_string()))?;
        let token = self.next_md_token.fetch_add(1, Ordering::Relaxed);
        let key = (symbol.to_string(), venue.to_string());

        let first = {
            let mut table = self.md_callbacks.lock();
            let entries = table.entry(key).or_default();
            let first = entries.is_empty();
            entries.push((token, callback));
            first
        };
        if first {
            if let Err(e) = adapter.subscribe_market_data(symbol) {
                let mut table = self.md_callbacks.lock();
                if let Some(entries) = table.get_mut(&(symbol.to_string(), venue.to_string())) {
                    entries.retain(|(t, _)| *t != token);
                    if entries.is_empty() {
                        table.remove(&(symbol.to_string(), venue.to_string()));
                    }
                }
                return Err(e);
            }
            debug!(symbol, venue, "adapter market data subscription opened");
        }
        Ok(MdSubscription {
            symbol: symbol.to_string(),
            venue: venue.to_string(),
            token,
        })
    }

    /// Drop a market data subscription; the adapter-level subscription is
    /// released when the last callback for `(symbol, venue)` goes away
    pub fn unsubscribe_market_data(&self, subscription: &MdSubscription) {
        let key = (subscription.symbol.clone(), subscription.venue.clone());
        let last = {
            let mut table = self.md_callbacks.lock();
            match table.get_mut(&key) {
                Some(entries) => {
                    entries.retain(|(t, _)| *t != subscription.token);
                    if entries.is_empty() {
                        table.remove(&key);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        if last {
            if let Some(adapter) = self.router.venue(&subscription.venue) {
                if let Err(e) = adapter.unsubscribe_market_data(&subscription.symbol) {
                    warn!(symbol = %subscription.symbol, venue = %subscription.venue, error = %e,
                        "adapter unsubscribe failed");
                }
            }
            debug!(symbol = %subscription.symbol, venue = %subscription.venue,
                "adapter market data subscription closed");
        }
    }

    /// Number of live callbacks for `(symbol, venue)`
    #[must_use]
    pub fn md_subscriber_count(&self, symbol: &str, venue: &str) -> usize {
        self.md_callbacks
            .lock()
            .get(&(symbol.to_string(), venue.to_string()))
            .map_or(0, Vec::len)
    }

    /// Submit an order through the risk gate to a venue
    pub fn submit_order(&self, order: Order, venue: &str) -> Result<OrderId, EngineError> {
        self.router.submit(order, venue)
    }

    /// Cancel an order on a venue
    pub fn cancel_order(&self, order_id: &OrderId, venue: &str) -> Result<(), EngineError> {
        self.router.cancel(order_id, venue)
    }

    /// Query order status on a venue
    pub fn order_status(
        &self,
        order_id: &OrderId,
        venue: &str,
    ) -> Result<OrderStatus, EngineError> {
        self.router.status(order_id, venue)
    }

    /// Snapshot of active orders, optionally filtered by venue
    #[must_use]
    pub fn active_orders(&self, venue: Option<&str>) -> Vec<(OrderId, Order, String)> {
        self.router.active_orders(venue)
    }

    /// Replace the risk limits
    pub fn set_risk_limits(&self, limits: RiskLimits) {
        self.risk.set_limits(limits);
    }

    /// Current risk limits
    #[must_use]
    pub fn risk_limits(&self) -> RiskLimits {
        self.risk.limits()
    }

    /// Enable pre-trade risk checks
    pub fn enable_risk(&self) {
        self.risk.enable();
    }

    /// Disable pre-trade risk checks; tracking continues
    pub fn disable_risk(&self) {
        self.risk.disable();
    }

    /// Shared risk engine
    #[must_use]
    pub fn risk(&self) -> Arc<RiskEngine> {
        self.risk.clone()
    }

    /// Shared router
    #[must_use]
    pub fn router(&self) -> Arc<OrderRouter> {
        self.router.clone()
    }

    /// Publish a system event through the serialized publish path
    pub fn publish_system(&self, event: SystemEvent) {
        let _guard = self.publish_lock.lock();
        let outcome = self.dispatcher.publish(Event::System(event));
        if !outcome.is_accepted() {
            warn!(?outcome, "system event dropped");
        }
    }

    /// Subscribe a raw event handler (order/trade/system streams)
    pub fn subscribe_events(&self, kind: EventKind, handler: Handler) -> SubscriptionId {
        self.dispatcher.subscribe(kind, handler)
    }

    /// Drop a raw event subscription
    pub fn unsubscribe_events(&self, id: SubscriptionId) {
        self.dispatcher.unsubscribe(id);
    }

    /// Dispatcher counter snapshot
    #[must_use]
    pub fn dispatcher_stats(&self) -> bus::dispatcher::DispatcherStats {
        self.dispatcher.stats()
    }

    /// Connect all adapters, then start the dispatcher
    pub fn start(&self) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for name in self.router.venues() {
            if let Some(adapter) = self.router.venue(&name) {
                adapter.connect()?;
            }
        }
        self.dispatcher.start();
        info!("execution core started");
        Ok(())
    }

    /// Stop the dispatcher, then disconnect adapters
    ///
    /// Strategies must be stopped by their manager before this is called;
    /// nothing here cancels in-flight orders.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        self.dispatcher.stop();
        for name in self.router.venues() {
            if let Some(adapter) = self.router.venue(&name) {
                if let Err(e) = adapter.disconnect() {
                    warn!(venue = %name, error = %e, "disconnect failed");
                }
            }
        }
        info!("execution core stopped");
    }

    /// Whether `start` has been called without a matching `stop`
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

impl OrderGateway for ExecutionCore {
    fn submit(&self, order: &Order, venue: &str) -> Result<OrderId, EngineError> {
        self.submit_order(order.clone(), venue)
    }

    fn cancel(&self, order_id: &OrderId, venue: &str) -> Result<(), EngineError> {
        self.cancel_order(order_id, venue)
    }
}

impl Drop for ExecutionCore {
    fn drop(&mut self) {
        self.dispatcher.stop();
        // Pump threads exit once their senders are gone or the core is
        // dropped; detach rather than join to avoid blocking drop
        self.pumps.lock().clear();
    }
}
