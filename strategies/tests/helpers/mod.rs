//! Shared test helpers

use common::error::EngineError;
use common::types::{MarketData, Order, OrderId, Side, TradeUpdate, Ts};
use engine::core::OrderGateway;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strategies::StrategyContext;

/// Gateway that records orders instead of routing them
#[derive(Default)]
pub struct RecordingGateway {
    next_id: AtomicU64,
    submitted: Mutex<Vec<(OrderId, Order, String)>>,
    cancelled: Mutex<Vec<(OrderId, String)>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> Vec<(OrderId, Order, String)> {
        self.submitted.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<(OrderId, String)> {
        self.cancelled.lock().clone()
    }

    pub fn submit_count(&self) -> usize {
        self.submitted.lock().len()
    }
}

impl OrderGateway for RecordingGateway {
    fn submit(&self, order: &Order, venue: &str) -> Result<OrderId, EngineError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let order_id = OrderId::new(format!("REC-{n}"));
        self.submitted
            .lock()
            .push((order_id.clone(), order.clone(), venue.to_string()));
        Ok(order_id)
    }

    fn cancel(&self, order_id: &OrderId, venue: &str) -> Result<(), EngineError> {
        self.cancelled
            .lock()
            .push((order_id.clone(), venue.to_string()));
        Ok(())
    }
}

/// A context wired to a recording gateway; keep the gateway alive for the
/// weak reference to hold
pub fn recording_ctx(name: &str) -> (Arc<RecordingGateway>, StrategyContext) {
    let gateway = Arc::new(RecordingGateway::new());
    let dyn_gateway: Arc<dyn OrderGateway> = gateway.clone();
    let ctx = StrategyContext::new(name, Arc::downgrade(&dyn_gateway));
    (gateway, ctx)
}

/// Top-of-book tick with a symmetric spread around the last price
pub fn tick(symbol: &str, last: f64) -> MarketData {
    let half = last * 0.0001;
    MarketData {
        symbol: symbol.to_string(),
        timestamp: Ts::now(),
        last_price: last,
        best_bid: last - half,
        best_ask: last + half,
        bid_volume: 1.0,
        ask_volume: 1.0,
        bids: Vec::new(),
        asks: Vec::new(),
    }
}

/// Fill matching a previously submitted order
pub fn fill_for(order_id: &OrderId, order: &Order, price: f64) -> TradeUpdate {
    TradeUpdate {
        order_id: order_id.clone(),
        symbol: order.symbol.clone(),
        price,
        volume: order.volume,
        side: order.side,
        timestamp: Ts::now(),
    }
}

/// Fill with an explicit volume (partial fills)
pub fn partial_fill_for(order_id: &OrderId, order: &Order, price: f64, volume: f64) -> TradeUpdate {
    TradeUpdate {
        order_id: order_id.clone(),
        symbol: order.symbol.clone(),
        price,
        volume,
        side: order.side,
        timestamp: Ts::now(),
    }
}

/// Assert helper: the order is a market order with the given side/volume
pub fn assert_market(order: &Order, side: Side, volume: f64) {
    assert_eq!(order.order_type, common::types::OrderType::Market);
    assert_eq!(order.side, side);
    assert!(
        (order.volume - volume).abs() < 1e-9,
        "expected volume {volume}, got {}",
        order.volume
    );
}
