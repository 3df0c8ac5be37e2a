//! Error taxonomy for the execution core

use crate::types::{OrderId, StrategyState};
use std::fmt;
use thiserror::Error;

/// Reason an order was rejected by the risk engine
///
/// One variant per admission check; the first failing check wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Order notional exceeds `max_order_notional`
    OrderNotional,
    /// Order volume exceeds the per-symbol volume cap
    SymbolVolumeCap,
    /// Projected position notional exceeds `max_position_notional`
    PositionNotional,
    /// Projected gross exposure over equity exceeds `max_leverage`
    Leverage,
    /// Current drawdown exceeds `max_drawdown`
    Drawdown,
    /// Day loss exceeds `max_daily_loss`
    DailyLoss,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OrderNotional => "order notional limit",
            Self::SymbolVolumeCap => "per-symbol volume cap",
            Self::PositionNotional => "position notional limit",
            Self::Leverage => "leverage limit",
            Self::Drawdown => "drawdown limit",
            Self::DailyLoss => "daily loss limit",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the execution core and venue adapters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Order rejected synchronously by the risk engine; never dispatched
    #[error("order rejected by risk: {0}")]
    RiskRejected(RejectReason),

    /// No venue registered under this name
    #[error("unknown venue: {0}")]
    UnknownVenue(String),

    /// Order id not known to the router or venue
    #[error("unknown order: {0}")]
    UnknownOrder(OrderId),

    /// Venue I/O failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Venue request exceeded its per-request timeout
    #[error("transport timeout")]
    TransportTimeout,

    /// Malformed venue message, dropped and counted
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The dispatcher is not running
    #[error("dispatcher not running")]
    NotRunning,

    /// Order failed validation before reaching the venue
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// Illegal strategy lifecycle transition
    #[error("invalid strategy transition from {from} to {to}")]
    InvalidTransition {
        /// State the strategy was in
        from: StrategyState,
        /// State that was requested
        to: StrategyState,
    },

    /// Venue connection permanently lost
    #[error("venue fatal: {0}")]
    VenueFatal(String),
}

/// Outcome of a non-blocking publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Event enqueued for dispatch
    Accepted,
    /// Event dropped; the reason says why
    Dropped(DropReason),
}

impl PublishOutcome {
    /// Whether the event was enqueued
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Why a publish was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The dispatcher is stopped
    NotRunning,
    /// The ring buffer is full
    BufferFull,
}
