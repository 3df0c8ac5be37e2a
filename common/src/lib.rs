//! Shared data model for the execution core
//!
//! Orders, updates, market data, events, positions, the error taxonomy and
//! typed configuration. Everything here is plain data: no I/O, no locks.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::{AppConfig, DispatcherConfig, RiskLimits, StrategySettings, VenueConfig};
pub use error::{DropReason, EngineError, PublishOutcome, RejectReason};
pub use events::{Event, EventKind, SystemEvent};
pub use types::{
    Balance, MarketData, Order, OrderId, OrderStatus, OrderType, OrderUpdate, Position, Side,
    StrategyState, TradeUpdate, Ts,
};
