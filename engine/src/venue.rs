//! Venue adapter contract
//!
//! One adapter per exchange. The adapter owns its transports and request
//! signing; it reports everything back through a single outbound channel of
//! [`AdapterEvent`]s which the execution core consumes on a per-venue pump
//! thread. A successful `submit_order` must return the order id before any
//! event referencing it is sent, and per-order timestamps must be monotone
//! with the terminal update last.

use common::error::EngineError;
use common::types::{Balance, MarketData, Order, OrderId, OrderStatus, OrderUpdate, Position, TradeUpdate};
use crossbeam::channel::Sender;
use rand::Rng;
use std::time::Duration;

/// Events flowing out of a venue adapter
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// Market data tick for a subscribed symbol
    MarketData(MarketData),
    /// Order state change
    OrderUpdate(OrderUpdate),
    /// Trade (fill)
    TradeUpdate(TradeUpdate),
    /// Unrecoverable failure; sent at most once, the adapter is dead after
    Fatal {
        /// Failure description
        reason: String,
    },
}

/// Capability interface over one exchange
pub trait VenueAdapter: Send + Sync {
    /// Venue name used for routing
    fn name(&self) -> &str;

    /// Open transports and authenticate
    fn connect(&self) -> Result<(), EngineError>;

    /// Close transports; outstanding orders stay on the venue
    fn disconnect(&self) -> Result<(), EngineError>;

    /// Start streaming market data for a symbol
    fn subscribe_market_data(&self, symbol: &str) -> Result<(), EngineError>;

    /// Stop streaming market data for a symbol
    fn unsubscribe_market_data(&self, symbol: &str) -> Result<(), EngineError>;

    /// Submit an order; returns the venue-assigned id
    fn submit_order(&self, order: &Order) -> Result<OrderId, EngineError>;

    /// Cancel an order by id
    fn cancel_order(&self, order_id: &OrderId) -> Result<(), EngineError>;

    /// Query current order status; also the reconciliation path after a
    /// transport glitch
    fn order_status(&self, order_id: &OrderId) -> Result<OrderStatus, EngineError>;

    /// Account balances
    fn balance(&self) -> Result<Balance, EngineError>;

    /// Venue-side positions
    fn positions(&self) -> Result<Vec<Position>, EngineError>;

    /// Install the outbound event channel; called once at registration
    fn set_event_sink(&self, sink: Sender<AdapterEvent>);
}

/// Exponential backoff schedule for adapter reconnects
///
/// Base 500 ms doubling to a 30 s cap, with +/-25% jitter. After a
/// reconnect the adapter re-sends its outstanding subscriptions and queries
/// in-flight orders via `order_status`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    cap: Duration,
    jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl ReconnectPolicy {
    /// Policy with explicit base and cap, keeping the default jitter
    #[must_use]
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            ..Self::default()
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based), jittered
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.min(16);
        let raw = self
            .base
            .saturating_mul(1u32 << exp)
            .min(self.cap)
            .as_secs_f64();
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64(raw * factor)
    }

    /// Upper bound of the schedule, without jitter
    #[must_use]
    pub fn cap(&self) -> Duration {
        self.cap
    }
}
