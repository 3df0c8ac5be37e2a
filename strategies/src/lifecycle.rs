//! Strategy lifecycle shell
//!
//! State machine: CREATED -> INITIALIZED -> RUNNING -> STOPPED, with ERROR
//! absorbing from any transition or hook failure. Events are delivered
//! only while RUNNING; a failing hook logs, moves the strategy to ERROR
//! and publishes a `StrategyFaulted` system event.

use anyhow::Result;
use common::config::StrategySettings;
use common::error::EngineError;
use common::events::{Event, EventKind, SystemEvent};
use common::types::{
    MarketData, Order, OrderId, OrderUpdate, Position, StrategyState, TradeUpdate,
};
use engine::core::{ExecutionCore, MdSubscription, OrderGateway};
use bus::dispatcher::{Handler, SubscriptionId};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Weak};
use tracing::{error, info, warn};

/// Strategy hook set
///
/// Hooks run on the dispatcher thread and must not block; long work
/// belongs elsewhere. Returning an `Err` from an event hook faults the
/// strategy.
pub trait StrategyLogic: Send {
    /// Reset local state; runs on `initialize`
    fn on_initialize(&mut self, ctx: &StrategyContext) -> Result<()>;

    /// Runs on `start`, after subscriptions are in place
    fn on_start(&mut self, ctx: &StrategyContext) -> Result<()>;

    /// Runs on `stop`, before locally-tracked orders are cancelled
    fn on_stop(&mut self, ctx: &StrategyContext) -> Result<()>;

    /// Release strategy-local resources
    fn on_cleanup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Market data tick for a subscribed symbol
    fn on_market_data(&mut self, ctx: &StrategyContext, data: &MarketData) -> Result<()>;

    /// Order state change
    fn on_order_update(&mut self, _ctx: &StrategyContext, _update: &OrderUpdate) -> Result<()> {
        Ok(())
    }

    /// Trade (fill)
    fn on_trade_update(&mut self, _ctx: &StrategyContext, _update: &TradeUpdate) -> Result<()> {
        Ok(())
    }
}

/// Order channel handed to strategy logic
///
/// Holds a weak reference to the gateway (the execution core) and tracks
/// the strategy's own active orders so `stop` can cancel them.
pub struct StrategyContext {
    name: String,
    gateway: Weak<dyn OrderGateway>,
    active: Mutex<FxHashMap<OrderId, String>>,
}

impl StrategyContext {
    /// Build a context over a gateway
    #[must_use]
    pub fn new(name: impl Into<String>, gateway: Weak<dyn OrderGateway>) -> Self {
        Self {
            name: name.into(),
            gateway,
            active: Mutex::new(FxHashMap::default()),
        }
    }

    /// Strategy name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submit an order and track it as ours
    pub fn submit(&self, order: Order, venue: &str) -> Result<OrderId, EngineError> {
        let gateway = self.gateway.upgrade().ok_or(EngineError::NotRunning)?;
        let order_id = gateway.submit(&order, venue)?;
        self.active
            .lock()
            .insert(order_id.clone(), venue.to_string());
        Ok(order_id)
    }

    /// Cancel one of our orders
    pub fn cancel(&self, order_id: &OrderId) -> Result<(), EngineError> {
        let venue = self
            .active
            .lock()
            .get(order_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownOrder(order_id.clone()))?;
        let gateway = self.gateway.upgrade().ok_or(EngineError::NotRunning)?;
        gateway.cancel(order_id, &venue)?;
        self.active.lock().remove(order_id);
        Ok(())
    }

    /// Cancel every tracked order; returns how many cancels succeeded
    pub fn cancel_all(&self) -> usize {
        let orders: Vec<(OrderId, String)> = self
            .active
            .lock()
            .iter()
            .map(|(id, venue)| (id.clone(), venue.clone()))
            .collect();
        let Some(gateway) = self.gateway.upgrade() else {
            return 0;
        };
        let mut cancelled = 0;
        for (order_id, venue) in orders {
            match gateway.cancel(&order_id, &venue) {
                Ok(()) => {
                    self.active.lock().remove(&order_id);
                    cancelled += 1;
                }
                Err(e) => {
                    // Racing fills are expected here
                    warn!(strategy = %self.name, order_id = %order_id, error = %e, "cancel on stop failed");
                    self.active.lock().remove(&order_id);
                }
            }
        }
        cancelled
    }

    /// Whether this order id belongs to us
    #[must_use]
    pub fn is_mine(&self, order_id: &OrderId) -> bool {
        self.active.lock().contains_key(order_id)
    }

    /// Snapshot of tracked order ids
    #[must_use]
    pub fn active_orders(&self) -> Vec<OrderId> {
        self.active.lock().keys().cloned().collect()
    }

    fn note_terminal(&self, order_id: &OrderId) {
        self.active.lock().remove(order_id);
    }
}

struct StrategyInner {
    name: String,
    settings: StrategySettings,
    core: Weak<ExecutionCore>,
    ctx: StrategyContext,
    state: Mutex<StrategyState>,
    logic: Mutex<Box<dyn StrategyLogic>>,
    positions: Mutex<FxHashMap<String, Position>>,
    md_subscriptions: Mutex<Vec<MdSubscription>>,
    event_subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl StrategyInner {
    fn fault(&self, err: &anyhow::Error) {
        *self.state.lock() = StrategyState::Error;
        error!(strategy = %self.name, error = %err, "strategy faulted");
        if let Some(core) = self.core.upgrade() {
            core.publish_system(SystemEvent::StrategyFaulted {
                strategy: self.name.clone(),
            });
        }
    }

    fn deliver_market_data(&self, data: &MarketData) {
        if *self.state.lock() != StrategyState::Running {
            return;
        }
        let result = self.logic.lock().on_market_data(&self.ctx, data);
        if let Err(e) = result {
            self.fault(&e);
        }
    }

    fn deliver_order_update(&self, update: &OrderUpdate) {
        if *self.state.lock() != StrategyState::Running {
            return;
        }
        if update.status.is_terminal() {
            self.ctx.note_terminal(&update.order_id);
        }
        let result = self.logic.lock().on_order_update(&self.ctx, update);
        if let Err(e) = result {
            self.fault(&e);
        }
    }

    fn deliver_trade_update(&self, update: &TradeUpdate) {
        if *self.state.lock() != StrategyState::Running {
            return;
        }
        // Bookkeep fills of our own orders; other strategies' fills are
        // visible to the hook but do not move our positions
        if self.ctx.is_mine(&update.order_id) {
            let mut positions = self.positions.lock();
            let position = positions
                .entry(update.symbol.clone())
                .or_insert_with(|| Position::new(update.symbol.clone()));
            position.apply_fill(update.side, update.volume, update.price);
            position.mark(update.price);
        }
        let result = self.logic.lock().on_trade_update(&self.ctx, update);
        if let Err(e) = result {
            self.fault(&e);
        }
    }
}

/// A strategy bound to the execution core
pub struct StrategyHandle {
    inner: Arc<StrategyInner>,
}

impl StrategyHandle {
    /// Bind strategy logic to the core with its settings
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        settings: StrategySettings,
        core: &Arc<ExecutionCore>,
        logic: Box<dyn StrategyLogic>,
    ) -> Self {
        let name = name.into();
        let gateway: Arc<dyn OrderGateway> = core.clone();
        let ctx = StrategyContext::new(name.clone(), Arc::downgrade(&gateway));
        Self {
            inner: Arc::new(StrategyInner {
                name,
                settings,
                core: Arc::downgrade(core),
                ctx,
                state: Mutex::new(StrategyState::Created),
                logic: Mutex::new(logic),
                positions: Mutex::new(FxHashMap::default()),
                md_subscriptions: Mutex::new(Vec::new()),
                event_subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Strategy name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> StrategyState {
        *self.inner.state.lock()
    }

    /// Position snapshot
    #[must_use]
    pub fn positions(&self) -> Vec<Position> {
        self.inner.positions.lock().values().cloned().collect()
    }

    /// Run the initialize hook; legal from CREATED or STOPPED
    pub fn initialize(&self) -> Result<()> {
        {
            let state = self.inner.state.lock();
            if !matches!(*state, StrategyState::Created | StrategyState::Stopped) {
                return Err(EngineError::InvalidTransition {
                    from: *state,
                    to: StrategyState::Initialized,
                }
                .into());
            }
        }
        let result = self.inner.logic.lock().on_initialize(&self.inner.ctx);
        match result {
            Ok(()) => {
                *self.inner.state.lock() = StrategyState::Initialized;
                info!(strategy = %self.inner.name, "strategy initialized");
                Ok(())
            }
            Err(e) => {
                self.inner.fault(&e);
                Err(e)
            }
        }
    }

    /// Subscribe the configured (symbol, venue) set and start; legal from
    /// INITIALIZED
    pub fn start(&self) -> Result<()> {
        {
            let state = self.inner.state.lock();
            if *state != StrategyState::Initialized {
                return Err(EngineError::InvalidTransition {
                    from: *state,
                    to: StrategyState::Running,
                }
                .into());
            }
        }
        let core = self
            .inner
            .core
            .upgrade()
            .ok_or(EngineError::NotRunning)?;

        let mut md_subscriptions = Vec::new();
        for symbol in &self.inner.settings.symbols {
            for venue in &self.inner.settings.venues {
                let weak = Arc::downgrade(&self.inner);
                let callback = Arc::new(move |data: &MarketData| {
                    if let Some(inner) = weak.upgrade() {
                        inner.deliver_market_data(data);
                    }
                });
                match core.subscribe_market_data(symbol, venue, callback) {
                    Ok(sub) => md_subscriptions.push(sub),
                    Err(e) => {
                        for sub in &md_subscriptions {
                            core.unsubscribe_market_data(sub);
                        }
                        let err = anyhow::Error::from(e);
                        self.inner.fault(&err);
                        return Err(err);
                    }
                }
            }
        }

        let weak = Arc::downgrade(&self.inner);
        let order_sub = core.subscribe_events(
            EventKind::OrderUpdate,
            Arc::new(move |event: &Event| {
                if let (Some(inner), Event::OrderUpdate { update, .. }) = (weak.upgrade(), event) {
                    inner.deliver_order_update(update);
                }
                Ok(())
            }) as Handler,
        );
        let weak = Arc::downgrade(&self.inner);
        let trade_sub = core.subscribe_events(
            EventKind::TradeUpdate,
            Arc::new(move |event: &Event| {
                if let (Some(inner), Event::TradeUpdate { update, .. }) = (weak.upgrade(), event) {
                    inner.deliver_trade_update(update);
                }
                Ok(())
            }) as Handler,
        );

        *self.inner.md_subscriptions.lock() = md_subscriptions;
        *self.inner.event_subscriptions.lock() = vec![order_sub, trade_sub];

        let result = self.inner.logic.lock().on_start(&self.inner.ctx);
        match result {
            Ok(()) => {
                *self.inner.state.lock() = StrategyState::Running;
                info!(strategy = %self.inner.name, "strategy started");
                Ok(())
            }
            Err(e) => {
                self.teardown_subscriptions(&core);
                self.inner.fault(&e);
                Err(e)
            }
        }
    }

    /// Unsubscribe, run the stop hook and cancel tracked orders; legal
    /// from RUNNING
    pub fn stop(&self) -> Result<()> {
        {
            let state = self.inner.state.lock();
            if *state != StrategyState::Running {
                return Err(EngineError::InvalidTransition {
                    from: *state,
                    to: StrategyState::Stopped,
                }
                .into());
            }
        }
        if let Some(core) = self.inner.core.upgrade() {
            self.teardown_subscriptions(&core);
        }
        let stop_result = self.inner.logic.lock().on_stop(&self.inner.ctx);
        let cancelled = self.inner.ctx.cancel_all();
        if cancelled > 0 {
            info!(strategy = %self.inner.name, cancelled, "open orders cancelled on stop");
        }
        match stop_result {
            Ok(()) => {
                *self.inner.state.lock() = StrategyState::Stopped;
                info!(strategy = %self.inner.name, "strategy stopped");
                Ok(())
            }
            Err(e) => {
                self.inner.fault(&e);
                Err(e)
            }
        }
    }

    /// Release strategy-local resources; legal from STOPPED or ERROR
    pub fn cleanup(&self) -> Result<()> {
        {
            let state = self.inner.state.lock();
            if !matches!(*state, StrategyState::Stopped | StrategyState::Error) {
                return Err(EngineError::InvalidTransition {
                    from: *state,
                    to: StrategyState::Stopped,
                }
                .into());
            }
        }
        self.inner.logic.lock().on_cleanup()?;
        self.inner.positions.lock().clear();
        info!(strategy = %self.inner.name, "strategy cleaned up");
        Ok(())
    }

    fn teardown_subscriptions(&self, core: &Arc<ExecutionCore>) {
        for sub in self.inner.md_subscriptions.lock().drain(..) {
            core.unsubscribe_market_data(&sub);
        }
        for id in self.inner.event_subscriptions.lock().drain(..) {
            core.unsubscribe_events(id);
        }
    }
}
