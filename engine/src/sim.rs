//! In-process simulated venue
//!
//! Reference adapter used by tests and the demo driver. Market orders fill
//! immediately against the last tick; limit orders rest until a tick
//! crosses them. All feedback flows through the adapter event sink like a
//! real venue.

use crate::venue::{AdapterEvent, VenueAdapter};
use common::error::EngineError;
use common::types::{
    Balance, MarketData, Order, OrderId, OrderStatus, OrderType, Position, Side, TradeUpdate, Ts,
};
use common::types::OrderUpdate;
use crossbeam::channel::Sender;
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

struct SimOrder {
    order: Order,
    status: OrderStatus,
    filled: f64,
}

/// Simulated venue adapter
pub struct SimVenue {
    name: String,
    orders: DashMap<OrderId, SimOrder>,
    positions: DashMap<String, Position>,
    last: DashMap<String, f64>,
    subscriptions: Mutex<FxHashSet<String>>,
    sink: Mutex<Option<Sender<AdapterEvent>>>,
    next_id: AtomicU64,
    connected: AtomicBool,
    starting_balance: f64,
}

impl SimVenue {
    /// Build a venue with the given name and quote-currency balance
    #[must_use]
    pub fn new(name: impl Into<String>, starting_balance: f64) -> Self {
        Self {
            name: name.into(),
            orders: DashMap::new(),
            positions: DashMap::new(),
            last: DashMap::new(),
            subscriptions: Mutex::new(FxHashSet::default()),
            sink: Mutex::new(None),
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            starting_balance,
        }
    }

    fn send(&self, event: AdapterEvent) {
        let sink = self.sink.lock();
        if let Some(tx) = sink.as_ref() {
            if tx.send(event).is_err() {
                debug!(venue = %self.name, "event sink disconnected");
            }
        }
    }

    fn next_order_id(&self) -> OrderId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        OrderId::new(format!("{}-{n}", self.name))
    }

    fn apply_fill(&self, order_id: &OrderId, order: &Order, price: f64) {
        {
            let mut position = self
                .positions
                .entry(order.symbol.clone())
                .or_insert_with(|| Position::new(order.symbol.clone()));
            position.apply_fill(order.side, order.volume, price);
            position.mark(price);
        }
        if let Some(mut sim) = self.orders.get_mut(order_id) {
            sim.status = OrderStatus::Filled;
            sim.filled = order.volume;
        }
        let now = Ts::now();
        self.send(AdapterEvent::TradeUpdate(TradeUpdate {
            order_id: order_id.clone(),
            symbol: order.symbol.clone(),
            price,
            volume: order.volume,
            side: order.side,
            timestamp: now,
        }));
        self.send(AdapterEvent::OrderUpdate(OrderUpdate {
            order_id: order_id.clone(),
            status: OrderStatus::Filled,
            filled_price: price,
            filled_volume: order.volume,
            timestamp: now,
            message: "filled".to_string(),
        }));
    }

    /// Drive the venue with one tick: publishes market data for subscribed
    /// symbols and fills resting limit orders the tick crosses
    pub fn push_tick(&self, symbol: &str, last_price: f64, best_bid: f64, best_ask: f64) {
        self.last.insert(symbol.to_string(), last_price);

        if self.subscriptions.lock().contains(symbol) {
            self.send(AdapterEvent::MarketData(MarketData {
                symbol: symbol.to_string(),
                timestamp: Ts::now(),
                last_price,
                best_bid,
                best_ask,
                bid_volume: 1.0,
                ask_volume: 1.0,
                bids: Vec::new(),
                asks: Vec::new(),
            }));
        }

        // Resting limit orders crossed by this tick fill at their limit
        let crossed: Vec<(OrderId, Order, f64)> = self
            .orders
            .iter()
            .filter_map(|entry| {
                let sim = entry.value();
                if sim.status != OrderStatus::Pending || sim.order.symbol != symbol {
                    return None;
                }
                let limit = sim.order.price?;
                let fills = match sim.order.side {
                    Side::Buy => last_price <= limit,
                    Side::Sell => last_price >= limit,
                };
                fills.then(|| (entry.key().clone(), sim.order.clone(), limit))
            })
            .collect();
        for (order_id, order, price) in crossed {
            debug!(venue = %self.name, order_id = %order_id, price, "limit order crossed");
            self.apply_fill(&order_id, &order, price);
        }
    }

    /// Simulate a permanent connection loss
    pub fn trigger_fatal(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(venue = %self.name, reason = %reason, "simulated fatal");
        self.connected.store(false, Ordering::Release);
        self.send(AdapterEvent::Fatal { reason });
    }

    /// Symbols with live market data subscriptions
    #[must_use]
    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.subscriptions.lock().iter().cloned().collect()
    }
}

impl VenueAdapter for SimVenue {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> Result<(), EngineError> {
        self.connected.store(true, Ordering::Release);
        info!(venue = %self.name, "connected");
        Ok(())
    }

    fn disconnect(&self) -> Result<(), EngineError> {
        self.connected.store(false, Ordering::Release);
        // Drop the sink so the core's pump thread winds down
        *self.sink.lock() = None;
        info!(venue = %self.name, "disconnected");
        Ok(())
    }

    fn subscribe_market_data(&self, symbol: &str) -> Result<(), EngineError> {
        self.subscriptions.lock().insert(symbol.to_string());
        debug!(venue = %self.name, symbol, "market data subscribed");
        Ok(())
    }

    fn unsubscribe_market_data(&self, symbol: &str) -> Result<(), EngineError> {
        self.subscriptions.lock().remove(symbol);
        debug!(venue = %self.name, symbol, "market data unsubscribed");
        Ok(())
    }

    fn submit_order(&self, order: &Order) -> Result<OrderId, EngineError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(EngineError::Transport(format!(
                "{} not connected",
                self.name
            )));
        }
        let order_id = self.next_order_id();
        self.orders.insert(
            order_id.clone(),
            SimOrder {
                order: order.clone(),
                status: OrderStatus::Pending,
                filled: 0.0,
            },
        );

        match order.order_type {
            OrderType::Market => {
                let price = self.last.get(&order.symbol).map(|p| *p).or(order.price);
                let Some(price) = price else {
                    self.orders.remove(&order_id);
                    return Err(EngineError::Transport(format!(
                        "no market for {}",
                        order.symbol
                    )));
                };
                self.apply_fill(&order_id, order, price);
            }
            OrderType::Limit => {
                // Marketable limits fill immediately, others rest
                let marketable = self.last.get(&order.symbol).map_or(false, |last| {
                    match order.side {
                        Side::Buy => *last <= order.price.unwrap_or(f64::MIN),
                        Side::Sell => *last >= order.price.unwrap_or(f64::MAX),
                    }
                });
                if marketable {
                    let price = order.price.expect("limit order carries a price");
                    self.apply_fill(&order_id, order, price);
                } else {
                    self.send(AdapterEvent::OrderUpdate(OrderUpdate {
                        order_id: order_id.clone(),
                        status: OrderStatus::Pending,
                        filled_price: 0.0,
                        filled_volume: 0.0,
                        timestamp: Ts::now(),
                        message: "resting".to_string(),
                    }));
                }
            }
            OrderType::Stop | OrderType::StopLimit => {
                self.orders.remove(&order_id);
                return Err(EngineError::Protocol(format!(
                    "{:?} orders not supported by {}",
                    order.order_type, self.name
                )));
            }
        }
        Ok(order_id)
    }

    fn cancel_order(&self, order_id: &OrderId) -> Result<(), EngineError> {
        let mut sim = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| EngineError::UnknownOrder(order_id.clone()))?;
        if sim.status.is_terminal() {
            return Err(EngineError::UnknownOrder(order_id.clone()));
        }
        sim.status = OrderStatus::Cancelled;
        let filled = sim.filled;
        drop(sim);
        self.send(AdapterEvent::OrderUpdate(OrderUpdate {
            order_id: order_id.clone(),
            status: OrderStatus::Cancelled,
            filled_price: 0.0,
            filled_volume: filled,
            timestamp: Ts::now(),
            message: "cancelled".to_string(),
        }));
        Ok(())
    }

    fn order_status(&self, order_id: &OrderId) -> Result<OrderStatus, EngineError> {
        self.orders
            .get(order_id)
            .map(|sim| sim.status)
            .ok_or_else(|| EngineError::UnknownOrder(order_id.clone()))
    }

    fn balance(&self) -> Result<Balance, EngineError> {
        let mut balance = Balance::default();
        balance
            .free
            .insert("USDT".to_string(), self.starting_balance);
        balance
            .total
            .insert("USDT".to_string(), self.starting_balance);
        Ok(balance)
    }

    fn positions(&self) -> Result<Vec<Position>, EngineError> {
        Ok(self
            .positions
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn set_event_sink(&self, sink: Sender<AdapterEvent>) {
        *self.sink.lock() = Some(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;

    fn connected_venue() -> (SimVenue, crossbeam::channel::Receiver<AdapterEvent>) {
        let venue = SimVenue::new("sim", 100_000.0);
        let (tx, rx) = unbounded();
        venue.set_event_sink(tx);
        venue.connect().unwrap();
        (venue, rx)
    }

    #[test]
    fn market_order_fills_at_last_tick() {
        let (venue, rx) = connected_venue();
        venue.push_tick("BTCUSDT", 50_000.0, 49_990.0, 50_010.0);
        let id = venue
            .submit_order(&Order::market("BTCUSDT", Side::Buy, 0.1))
            .unwrap();
        assert_eq!(venue.order_status(&id).unwrap(), OrderStatus::Filled);

        let events: Vec<AdapterEvent> = rx.try_iter().collect();
        assert!(events.iter().any(|e| matches!(
            e,
            AdapterEvent::TradeUpdate(t) if t.order_id == id && (t.price - 50_000.0).abs() < 1e-9
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            AdapterEvent::OrderUpdate(u) if u.order_id == id && u.status == OrderStatus::Filled
        )));
    }

    #[test]
    fn resting_limit_fills_when_crossed() {
        let (venue, rx) = connected_venue();
        venue.push_tick("BTCUSDT", 50_000.0, 49_990.0, 50_010.0);
        let id = venue
            .submit_order(&Order::limit("BTCUSDT", Side::Buy, 49_500.0, 0.2))
            .unwrap();
        assert_eq!(venue.order_status(&id).unwrap(), OrderStatus::Pending);

        venue.push_tick("BTCUSDT", 49_400.0, 49_390.0, 49_410.0);
        assert_eq!(venue.order_status(&id).unwrap(), OrderStatus::Filled);
        let fill = rx.try_iter().find_map(|e| match e {
            AdapterEvent::TradeUpdate(t) if t.order_id == id => Some(t),
            _ => None,
        });
        // Fills at the limit price, not the tick
        assert!((fill.expect("trade emitted").price - 49_500.0).abs() < 1e-9);
    }

    #[test]
    fn cancel_rejects_unknown_and_terminal_orders() {
        let (venue, _rx) = connected_venue();
        let missing = OrderId::new("sim-404");
        assert!(matches!(
            venue.cancel_order(&missing).unwrap_err(),
            EngineError::UnknownOrder(_)
        ));

        venue.push_tick("BTCUSDT", 50_000.0, 49_990.0, 50_010.0);
        let id = venue
            .submit_order(&Order::market("BTCUSDT", Side::Sell, 0.1))
            .unwrap();
        assert!(matches!(
            venue.cancel_order(&id).unwrap_err(),
            EngineError::UnknownOrder(_)
        ));
    }

    #[test]
    fn venue_positions_mirror_fills() {
        let (venue, _rx) = connected_venue();
        venue.push_tick("ETHUSDT", 3_000.0, 2_999.0, 3_001.0);
        venue
            .submit_order(&Order::market("ETHUSDT", Side::Buy, 2.0))
            .unwrap();
        let positions = venue.positions().unwrap();
        assert_eq!(positions.len(), 1);
        assert!((positions[0].volume - 2.0).abs() < 1e-12);
    }

    #[test]
    fn subscriptions_gate_market_data_events() {
        let (venue, rx) = connected_venue();
        venue.push_tick("BTCUSDT", 50_000.0, 49_990.0, 50_010.0);
        assert!(rx.try_iter().count() == 0, "unsubscribed tick not emitted");

        venue.subscribe_market_data("BTCUSDT").unwrap();
        venue.push_tick("BTCUSDT", 50_100.0, 50_090.0, 50_110.0);
        assert!(matches!(
            rx.try_recv().unwrap(),
            AdapterEvent::MarketData(d) if (d.last_price - 50_100.0).abs() < 1e-9
        ));

        venue.unsubscribe_market_data("BTCUSDT").unwrap();
        venue.push_tick("BTCUSDT", 50_200.0, 50_190.0, 50_210.0);
        assert_eq!(rx.try_iter().count(), 0);
    }
}
