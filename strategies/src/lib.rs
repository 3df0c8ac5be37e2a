//! Trading strategies
//!
//! The lifecycle shell ([`StrategyHandle`]) owns subscriptions, local
//! order tracking and position bookkeeping; strategy logic plugs in
//! through [`StrategyLogic`] hooks. Three reference strategies exercise
//! the core: a spread-quoting market maker, a moving-average trend
//! follower and a pair statistical arbitrage.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod lifecycle;
pub mod manager;
pub mod market_maker;
pub mod stat_arb;
pub mod trend_follower;

pub use lifecycle::{StrategyContext, StrategyHandle, StrategyLogic};
pub use manager::StrategyManager;
pub use market_maker::{MarketMaker, MarketMakerConfig};
pub use stat_arb::{PairConfig, StatArbConfig, StatArbitrage};
pub use trend_follower::{TrendFollower, TrendFollowerConfig};
