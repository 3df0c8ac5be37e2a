//! Moving-average trend follower
//!
//! Trades crossovers of a short and a long SMA, sizing entries inversely
//! to ATR, with percentage stop and target levels evaluated on every tick.
//! Indicator math goes through the numerics backend; a backend failure
//! skips the tick and nothing else.

use crate::lifecycle::{StrategyContext, StrategyLogic};
use anyhow::Result;
use common::config::StrategySettings;
use common::types::{MarketData, Order, OrderId, Side, TradeUpdate};
use numerics::{NumericsBackend, NumericsError};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Trend follower parameters
#[derive(Debug, Clone)]
pub struct TrendFollowerConfig {
    /// Short SMA period
    pub short_period: usize,
    /// Long SMA period; also the price window length
    pub long_period: usize,
    /// ATR period over absolute close-to-close moves
    pub atr_period: usize,
    /// Base position size before ATR scaling
    pub position_size: f64,
    /// Hard cap on entry size
    pub max_position_size: f64,
    /// Stop distance from entry, as a fraction
    pub stop_loss_pct: f64,
    /// Target distance from entry, as a fraction
    pub take_profit_pct: f64,
    /// ATR multiplier in the sizing rule
    pub atr_multiplier: f64,
}

impl Default for TrendFollowerConfig {
    fn default() -> Self {
        Self {
            short_period: 10,
            long_period: 30,
            atr_period: 14,
            position_size: 1.0,
            max_position_size: 5.0,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
            atr_multiplier: 1.0,
        }
    }
}

impl TrendFollowerConfig {
    /// Read parameters out of strategy settings, keeping defaults for
    /// missing keys
    #[must_use]
    pub fn from_settings(settings: &StrategySettings) -> Self {
        let d = Self::default();
        Self {
            short_period: settings.param("short_period", d.short_period as f64) as usize,
            long_period: settings.param("long_period", d.long_period as f64) as usize,
            atr_period: settings.param("atr_period", d.atr_period as f64) as usize,
            position_size: settings.param("position_size", d.position_size),
            max_position_size: settings.param("max_position_size", d.max_position_size),
            stop_loss_pct: settings.param("stop_loss_pct", d.stop_loss_pct),
            take_profit_pct: settings.param("take_profit_pct", d.take_profit_pct),
            atr_multiplier: settings.param("atr_multiplier", d.atr_multiplier),
        }
    }
}

/// Reference trend-following strategy over a single symbol and venue
pub struct TrendFollower {
    config: TrendFollowerConfig,
    symbol: String,
    venue: String,
    backend: Arc<dyn NumericsBackend>,
    prices: VecDeque<f64>,
    // Sign of (short SMA - long SMA) on the previous tick; crossovers are
    // edge-triggered so one cross emits exactly one entry
    prev_ma_sign: i8,
    position: f64,
    entry_price: f64,
    stop_price: f64,
    target_price: f64,
    closing: bool,
    my_orders: FxHashSet<OrderId>,
}

impl TrendFollower {
    /// Build a follower for one symbol on one venue
    #[must_use]
    pub fn new(
        config: TrendFollowerConfig,
        symbol: impl Into<String>,
        venue: impl Into<String>,
        backend: Arc<dyn NumericsBackend>,
    ) -> Self {
        Self {
            config,
            symbol: symbol.into(),
            venue: venue.into(),
            backend,
            prices: VecDeque::new(),
            prev_ma_sign: 0,
            position: 0.0,
            entry_price: 0.0,
            stop_price: 0.0,
            target_price: 0.0,
            closing: false,
            my_orders: FxHashSet::default(),
        }
    }

    /// Current signed position
    #[must_use]
    pub fn position(&self) -> f64 {
        self.position
    }

    fn indicators(&self) -> Result<Option<(f64, f64, f64)>, NumericsError> {
        if self.prices.len() < self.config.long_period {
            return Ok(None);
        }
        let prices: Vec<f64> = self.prices.iter().copied().collect();
        let short = *self
            .backend
            .moving_average(&prices, self.config.short_period)?
            .last()
            .expect("series long enough for short period");
        let long = *self
            .backend
            .moving_average(&prices, self.config.long_period)?
            .last()
            .expect("series long enough for long period");
        let moves: Vec<f64> = prices.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
        let atr = if moves.len() >= self.config.atr_period {
            *self
                .backend
                .moving_average(&moves, self.config.atr_period)?
                .last()
                .expect("series long enough for atr period")
        } else {
            0.0
        };
        Ok(Some((short, long, atr)))
    }

    fn entry_size(&self, atr: f64) -> f64 {
        if atr > 0.0 {
            (self.config.position_size * self.config.atr_multiplier / atr)
                .clamp(0.0, self.config.max_position_size)
        } else {
            self.config.max_position_size
        }
    }

    fn submit_market(&mut self, ctx: &StrategyContext, side: Side, volume: f64) {
        if volume <= 0.0 {
            return;
        }
        match ctx.submit(Order::market(&self.symbol, side, volume), &self.venue) {
            Ok(order_id) => {
                self.my_orders.insert(order_id);
            }
            Err(e) => warn!(side = %side, volume, error = %e, "trend order rejected"),
        }
    }

    fn close_position(&mut self, ctx: &StrategyContext) {
        if self.position == 0.0 || self.closing {
            return;
        }
        let side = if self.position > 0.0 { Side::Sell } else { Side::Buy };
        let volume = self.position.abs();
        debug!(side = %side, volume, "closing position");
        self.closing = true;
        self.submit_market(ctx, side, volume);
    }

    fn check_exits(&mut self, ctx: &StrategyContext, last_price: f64) {
        if self.position == 0.0 || self.closing || self.entry_price <= 0.0 {
            return;
        }
        let breached = if self.position > 0.0 {
            last_price <= self.stop_price || last_price >= self.target_price
        } else {
            last_price >= self.stop_price || last_price <= self.target_price
        };
        if breached {
            info!(last_price, stop = self.stop_price, target = self.target_price, "exit level breached");
            self.close_position(ctx);
        }
    }

    fn check_signals(&mut self, ctx: &StrategyContext, short: f64, long: f64, atr: f64) {
        let sign = match short.partial_cmp(&long) {
            Some(std::cmp::Ordering::Greater) => 1,
            Some(std::cmp::Ordering::Less) => -1,
            _ => 0,
        };
        let bullish = sign > 0 && self.prev_ma_sign <= 0;
        let bearish = sign < 0 && self.prev_ma_sign >= 0;
        if sign != 0 {
            self.prev_ma_sign = sign;
        }

        if bullish && self.position <= 0.0 && !self.closing {
            if self.position < 0.0 {
                self.close_position(ctx);
            }
            let size = self.entry_size(atr);
            info!(short, long, size, "bullish crossover");
            self.submit_market(ctx, Side::Buy, size);
        } else if bearish && self.position >= 0.0 && !self.closing {
            if self.position > 0.0 {
                self.close_position(ctx);
            }
            let size = self.entry_size(atr);
            info!(short, long, size, "bearish crossover");
            self.submit_market(ctx, Side::Sell, size);
        }
    }

    fn set_exit_levels(&mut self) {
        if self.position > 0.0 {
            self.stop_price = self.entry_price * (1.0 - self.config.stop_loss_pct);
            self.target_price = self.entry_price * (1.0 + self.config.take_profit_pct);
        } else if self.position < 0.0 {
            self.stop_price = self.entry_price * (1.0 + self.config.stop_loss_pct);
            self.target_price = self.entry_price * (1.0 - self.config.take_profit_pct);
        } else {
            self.stop_price = 0.0;
            self.target_price = 0.0;
        }
    }
}

impl StrategyLogic for TrendFollower {
    fn on_initialize(&mut self, _ctx: &StrategyContext) -> Result<()> {
        self.prices.clear();
        self.prev_ma_sign = 0;
        self.position = 0.0;
        self.entry_price = 0.0;
        self.stop_price = 0.0;
        self.target_price = 0.0;
        self.closing = false;
        self.my_orders.clear();
        Ok(())
    }

    fn on_start(&mut self, _ctx: &StrategyContext) -> Result<()> {
        info!(symbol = %self.symbol, venue = %self.venue, "trend follower started");
        Ok(())
    }

    fn on_stop(&mut self, ctx: &StrategyContext) -> Result<()> {
        // Flatten before the shell cancels any resting orders
        self.close_position(ctx);
        Ok(())
    }

    fn on_market_data(&mut self, ctx: &StrategyContext, data: &MarketData) -> Result<()> {
        if data.symbol != self.symbol || data.last_price <= 0.0 {
            return Ok(());
        }
        self.prices.push_back(data.last_price);
        while self.prices.len() > self.config.long_period {
            self.prices.pop_front();
        }

        self.check_exits(ctx, data.last_price);

        match self.indicators() {
            Ok(Some((short, long, atr))) => self.check_signals(ctx, short, long, atr),
            Ok(None) => {}
            Err(e) => {
                // Numerics failure is fatal to this tick only
                warn!(error = %e, "numerics backend failed, skipping tick");
            }
        }
        Ok(())
    }

    fn on_trade_update(&mut self, _ctx: &StrategyContext, update: &TradeUpdate) -> Result<()> {
        if update.symbol != self.symbol || !self.my_orders.contains(&update.order_id) {
            return Ok(());
        }
        let before = self.position;
        self.position += update.side.sign() * update.volume;
        if self.position == 0.0 {
            self.closing = false;
            self.entry_price = 0.0;
        } else if before == 0.0 || before.signum() != self.position.signum() {
            // New exposure (fresh entry or flip): stops key off this fill
            self.entry_price = update.price;
            self.closing = false;
        }
        self.set_exit_levels();
        debug!(position = self.position, entry = self.entry_price, "position updated");
        Ok(())
    }
}
