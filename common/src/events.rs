//! Events flowing through the dispatcher

use crate::types::{MarketData, OrderUpdate, TradeUpdate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event kind, used as the subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Market data tick
    MarketData,
    /// Order state change
    OrderUpdate,
    /// Trade (fill)
    TradeUpdate,
    /// Strategy-emitted signal
    StrategySignal,
    /// System notification
    System,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MarketData => "market_data",
            Self::OrderUpdate => "order_update",
            Self::TradeUpdate => "trade_update",
            Self::StrategySignal => "strategy_signal",
            Self::System => "system",
        };
        f.write_str(s)
    }
}

/// System-level notifications published on the event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SystemEvent {
    /// A strategy hook failed; the strategy moved to ERROR
    StrategyFaulted {
        /// Name of the faulted strategy
        strategy: String,
    },
    /// A venue connection was permanently lost and unregistered
    VenueFatal {
        /// Venue name
        venue: String,
        /// Failure description
        reason: String,
    },
    /// Publish drop rate exceeded the threshold inside the window
    Degraded {
        /// Drops observed in the window
        dropped: u64,
        /// Window length in seconds
        window_secs: u64,
    },
    /// Day boundary crossed; risk daily metrics reset
    DayRollover,
}

/// A dispatched event, tagged with its source venue where one exists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Market data from a venue
    MarketData {
        /// Source venue
        venue: String,
        /// The tick
        data: MarketData,
    },
    /// Order update from a venue
    OrderUpdate {
        /// Source venue
        venue: String,
        /// The update
        update: OrderUpdate,
    },
    /// Trade update from a venue
    TradeUpdate {
        /// Source venue
        venue: String,
        /// The trade
        update: TradeUpdate,
    },
    /// Signal emitted by a strategy
    StrategySignal {
        /// Emitting strategy
        strategy: String,
        /// Free-form signal description
        detail: String,
    },
    /// System notification
    System(SystemEvent),
}

impl Event {
    /// The subscription key for this event
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::MarketData { .. } => EventKind::MarketData,
            Self::OrderUpdate { .. } => EventKind::OrderUpdate,
            Self::TradeUpdate { .. } => EventKind::TradeUpdate,
            Self::StrategySignal { .. } => EventKind::StrategySignal,
            Self::System(_) => EventKind::System,
        }
    }

    /// Source venue, when the event has one
    #[must_use]
    pub fn venue(&self) -> Option<&str> {
        match self {
            Self::MarketData { venue, .. }
            | Self::OrderUpdate { venue, .. }
            | Self::TradeUpdate { venue, .. } => Some(venue),
            Self::StrategySignal { .. } | Self::System(_) => None,
        }
    }
}
