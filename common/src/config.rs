//! Typed configuration with defaults
//!
//! The core takes these structs at construction; nothing reads global state.
//! File loading lives in the driver binary.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Per-venue connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VenueConfig {
    /// REST endpoint
    pub rest_endpoint: String,
    /// WebSocket endpoint
    pub ws_endpoint: String,
    /// Per-request HTTP timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            rest_endpoint: String::new(),
            ws_endpoint: String::new(),
            timeout_ms: 5_000,
        }
    }
}

/// Pre-trade risk limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Maximum |volume * reference_price| per order
    pub max_order_notional: f64,
    /// Maximum projected position notional per symbol
    pub max_position_notional: f64,
    /// Maximum gross exposure over equity
    pub max_leverage: f64,
    /// Maximum drawdown from peak equity, as a fraction
    pub max_drawdown: f64,
    /// Maximum absolute loss since the daily baseline
    pub max_daily_loss: f64,
    /// Per-symbol order volume caps
    pub symbol_limits: FxHashMap<String, f64>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_order_notional: 100_000.0,
            max_position_notional: 1_000_000.0,
            max_leverage: 3.0,
            max_drawdown: 0.1,
            max_daily_loss: 10_000.0,
            symbol_limits: FxHashMap::default(),
        }
    }
}

/// Per-strategy wiring and parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    /// Symbols the strategy subscribes to
    pub symbols: Vec<String>,
    /// Venues the strategy trades on
    pub venues: Vec<String>,
    /// Numeric strategy parameters
    pub params: FxHashMap<String, f64>,
}

impl StrategySettings {
    /// Read a parameter, falling back to a default
    #[must_use]
    pub fn param(&self, key: &str, default: f64) -> f64 {
        self.params.get(key).copied().unwrap_or(default)
    }
}

/// Event dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Ring capacity; rounded up to a power of two
    pub buffer_size: usize,
    /// Publish drops inside the window that trigger a Degraded event
    pub degraded_threshold: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1_024,
            degraded_threshold: 64,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Venue connection settings by venue name
    pub exchanges: FxHashMap<String, VenueConfig>,
    /// Risk limits
    pub risk: RiskLimits,
    /// Strategy settings by strategy name
    pub strategies: FxHashMap<String, StrategySettings>,
    /// Dispatcher settings
    pub dispatcher: DispatcherConfig,
}
