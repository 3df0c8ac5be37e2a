//! Core trading types
//!
//! Prices and volumes are `f64`; symbols are opaque strings scoped to a
//! venue. Venue order ids are wrapped in [`OrderId`] and never interpreted
//! by the core.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp in nanoseconds since UNIX epoch
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Ts(pub u64);

impl Ts {
    /// Get current timestamp
    #[must_use]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0));
        let nanos = duration.as_secs() * 1_000_000_000 + u64::from(duration.subsec_nanos());
        Self(nanos)
    }

    /// Create timestamp from nanoseconds
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Get timestamp as nanoseconds
    #[must_use]
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Get timestamp as milliseconds
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0 / 1_000_000
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Venue-assigned order identifier, unique within a venue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    /// Wrap a raw venue id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw venue id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy order
    Buy,
    /// Sell order
    Sell,
}

impl Side {
    /// +1.0 for buys, -1.0 for sells
    #[must_use]
    pub const fn sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }

    /// The closing side
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => f.write_str("BUY"),
            Self::Sell => f.write_str("SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// Execute at the current market price
    Market,
    /// Execute at the limit price or better
    Limit,
    /// Trigger a market order at the stop price
    Stop,
    /// Trigger a limit order at the stop price
    StopLimit,
}

impl OrderType {
    /// Whether this order type carries a limit price
    #[must_use]
    pub const fn requires_price(self) -> bool {
        matches!(self, Self::Limit | Self::StopLimit)
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted by the venue, not yet filled
    Pending,
    /// Partially filled
    Partial,
    /// Fully filled
    Filled,
    /// Cancelled
    Cancelled,
    /// Rejected by the venue
    Rejected,
}

impl OrderStatus {
    /// Terminal states receive no further updates
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

/// An order as created by a strategy, immutable once submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Instrument symbol, venue-scoped
    pub symbol: String,
    /// Buy or sell
    pub side: Side,
    /// Order type
    pub order_type: OrderType,
    /// Limit price, required iff the type carries one
    pub price: Option<f64>,
    /// Order volume, strictly positive
    pub volume: f64,
    /// Optional strategy-scoped tag
    pub client_tag: Option<String>,
}

impl Order {
    /// Market order shorthand
    #[must_use]
    pub fn market(symbol: impl Into<String>, side: Side, volume: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            price: None,
            volume,
            client_tag: None,
        }
    }

    /// Limit order shorthand
    #[must_use]
    pub fn limit(symbol: impl Into<String>, side: Side, price: f64, volume: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            volume,
            client_tag: None,
        }
    }

    /// Validate required fields before submission
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.is_empty() {
            return Err("order symbol is empty".to_string());
        }
        if !(self.volume > 0.0) {
            return Err(format!("order volume must be positive, got {}", self.volume));
        }
        if self.order_type.requires_price() && self.price.is_none() {
            return Err(format!("{:?} order requires a price", self.order_type));
        }
        if let Some(price) = self.price {
            if !(price > 0.0) {
                return Err(format!("order price must be positive, got {price}"));
            }
        }
        Ok(())
    }
}

/// Order state change pushed by a venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    /// Venue order id
    pub order_id: OrderId,
    /// New status
    pub status: OrderStatus,
    /// Average fill price so far
    pub filled_price: f64,
    /// Cumulative filled volume, monotone non-decreasing per order
    pub filled_volume: f64,
    /// Venue timestamp
    pub timestamp: Ts,
    /// Free-form venue message
    pub message: String,
}

/// Single trade (fill) pushed by a venue; one order may produce many
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeUpdate {
    /// Venue order id of the filled order
    pub order_id: OrderId,
    /// Instrument symbol
    pub symbol: String,
    /// Trade price
    pub price: f64,
    /// Trade volume, strictly positive
    pub volume: f64,
    /// Side of the filled order
    pub side: Side,
    /// Venue timestamp
    pub timestamp: Ts,
}

/// Top-of-book market data tick; depth vectors are optional and may be empty
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    /// Instrument symbol
    pub symbol: String,
    /// Venue timestamp, monotone non-decreasing per (venue, symbol)
    pub timestamp: Ts,
    /// Last traded price
    pub last_price: f64,
    /// Best bid price
    pub best_bid: f64,
    /// Best ask price
    pub best_ask: f64,
    /// Volume at best bid
    pub bid_volume: f64,
    /// Volume at best ask
    pub ask_volume: f64,
    /// Bid depth as (price, volume), best first
    pub bids: Vec<(f64, f64)>,
    /// Ask depth as (price, volume), best first
    pub asks: Vec<(f64, f64)>,
}

impl MarketData {
    /// Midpoint of the top of book, if both sides are present
    #[must_use]
    pub fn mid(&self) -> Option<f64> {
        if self.best_bid > 0.0 && self.best_ask > 0.0 {
            Some((self.best_bid + self.best_ask) / 2.0)
        } else {
            None
        }
    }
}

/// Account balances per asset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Available balances
    pub free: FxHashMap<String, f64>,
    /// Balances locked in open orders
    pub locked: FxHashMap<String, f64>,
    /// Total balances
    pub total: FxHashMap<String, f64>,
}

/// Net position in one instrument
///
/// `volume` is signed: positive long, negative short. The averaging rule:
/// same-side fills move `average_price` to the volume-weighted average,
/// reducing fills preserve it and realize PnL at the prior average, and a
/// side flip resets it to the fill price for the residual exposure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Instrument symbol
    pub symbol: String,
    /// Signed net volume
    pub volume: f64,
    /// Average entry price of the open exposure
    pub average_price: f64,
    /// Unrealized PnL at the last mark
    pub unrealized_pnl: f64,
    /// Realized PnL accumulated from closed exposure
    pub realized_pnl: f64,
}

impl Position {
    /// Empty position for a symbol
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    /// Apply one fill to the position
    pub fn apply_fill(&mut self, side: Side, volume: f64, price: f64) {
        debug_assert!(volume > 0.0, "fill volume must be positive");
        let signed = side.sign() * volume;
        let old = self.volume;
        let new = old + signed;

        if old == 0.0 || old.signum() == signed.signum() {
            // Same-side increment (or opening): volume-weighted average
            let total = old.abs() + volume;
            if total > 0.0 {
                self.average_price =
                    (self.average_price * old.abs() + price * volume) / total;
            }
        } else if new == 0.0 || new.signum() == old.signum() {
            // Reducing: average preserved, closed portion realized at prior avg
            let closed = volume.min(old.abs());
            self.realized_pnl += (price - self.average_price) * closed * old.signum();
            if new == 0.0 {
                self.average_price = 0.0;
            }
        } else {
            // Side flip: realize the whole old exposure, restart at fill price
            let closed = old.abs();
            self.realized_pnl += (price - self.average_price) * closed * old.signum();
            self.average_price = price;
        }

        self.volume = new;
    }

    /// Recompute unrealized PnL against a mark price
    pub fn mark(&mut self, price: f64) {
        self.unrealized_pnl = (price - self.average_price) * self.volume;
    }

    /// Notional value of the open exposure at a given price
    #[must_use]
    pub fn notional(&self, price: f64) -> f64 {
        (self.volume * price).abs()
    }
}

/// Strategy lifecycle state
///
/// `Error` is absorbing and reachable from any non-terminal state. Only
/// `Running` strategies receive events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyState {
    /// Constructed, not yet initialized
    Created,
    /// Initialized, ready to start
    Initialized,
    /// Receiving events
    Running,
    /// Stopped cleanly
    Stopped,
    /// Faulted; no further transitions except cleanup
    Error,
}

impl fmt::Display for StrategyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Initialized => "INITIALIZED",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}
