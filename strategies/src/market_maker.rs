//! Spread-quoting market maker
//!
//! Quotes both sides around the mid, widening with realized volatility
//! and skewing with inventory. Quotes are pulled and replaced only when
//! the market has moved enough, inventory has swung, or a quote filled.

use crate::lifecycle::{StrategyContext, StrategyLogic};
use anyhow::Result;
use common::config::StrategySettings;
use common::types::{MarketData, Order, OrderId, OrderUpdate, OrderStatus, Side, TradeUpdate};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Market maker parameters
#[derive(Debug, Clone)]
pub struct MarketMakerConfig {
    /// Base half-spread-pair width as a fraction of mid
    pub base_spread: f64,
    /// Weight of realized volatility in the target spread
    pub vol_multiplier: f64,
    /// Lower clamp on the target spread
    pub min_spread: f64,
    /// Upper clamp on the target spread
    pub max_spread: f64,
    /// Quote skew per unit of inventory
    pub skew_factor: f64,
    /// Volume of each quote
    pub order_size: f64,
    /// Absolute inventory bound
    pub inventory_limit: f64,
    /// Rolling mid window length for the volatility estimate
    pub price_queue_size: usize,
}

impl Default for MarketMakerConfig {
    fn default() -> Self {
        Self {
            base_spread: 0.002,
            vol_multiplier: 0.5,
            min_spread: 0.0005,
            max_spread: 0.02,
            skew_factor: -0.0001,
            order_size: 0.1,
            inventory_limit: 1.0,
            price_queue_size: 50,
        }
    }
}

impl MarketMakerConfig {
    /// Read parameters out of strategy settings, keeping defaults for
    /// missing keys
    #[must_use]
    pub fn from_settings(settings: &StrategySettings) -> Self {
        let d = Self::default();
        Self {
            base_spread: settings.param("base_spread", d.base_spread),
            vol_multiplier: settings.param("vol_multiplier", d.vol_multiplier),
            min_spread: settings.param("min_spread", d.min_spread),
            max_spread: settings.param("max_spread", d.max_spread),
            skew_factor: settings.param("skew_factor", d.skew_factor),
            order_size: settings.param("order_size", d.order_size),
            inventory_limit: settings.param("inventory_limit", d.inventory_limit),
            price_queue_size: settings.param("price_queue_size", d.price_queue_size as f64) as usize,
        }
    }
}

/// Reference market making strategy over a single symbol and venue
pub struct MarketMaker {
    config: MarketMakerConfig,
    symbol: String,
    venue: String,
    mids: VecDeque<f64>,
    inventory: f64,
    inventory_at_quote: f64,
    last_quote_mid: Option<f64>,
    active_bid: Option<OrderId>,
    active_ask: Option<OrderId>,
    quote_filled: bool,
    my_orders: FxHashSet<OrderId>,
}

impl MarketMaker {
    /// Build a maker quoting one symbol on one venue
    #[must_use]
    pub fn new(config: MarketMakerConfig, symbol: impl Into<String>, venue: impl Into<String>) -> Self {
        Self {
            config,
            symbol: symbol.into(),
            venue: venue.into(),
            mids: VecDeque::new(),
            inventory: 0.0,
            inventory_at_quote: 0.0,
            last_quote_mid: None,
            active_bid: None,
            active_ask: None,
            quote_filled: false,
            my_orders: FxHashSet::default(),
        }
    }

    /// Current signed inventory
    #[must_use]
    pub fn inventory(&self) -> f64 {
        self.inventory
    }

    /// Population standard deviation of the mid window
    fn volatility(&self) -> f64 {
        if self.mids.len() < 2 {
            return 0.0;
        }
        let n = self.mids.len() as f64;
        let mean = self.mids.iter().sum::<f64>() / n;
        let var = self.mids.iter().map(|m| (m - mean) * (m - mean)).sum::<f64>() / n;
        var.sqrt()
    }

    fn target_spread(&self) -> f64 {
        let raw = self.config.base_spread + self.volatility() * self.config.vol_multiplier;
        raw.clamp(self.config.min_spread, self.config.max_spread)
    }

    fn should_requote(&self, mid: f64, spread: f64) -> bool {
        if self.quote_filled {
            return true;
        }
        let Some(last_mid) = self.last_quote_mid else {
            return true;
        };
        if (mid - last_mid).abs() / mid >= spread / 4.0 {
            return true;
        }
        (self.inventory - self.inventory_at_quote).abs() >= 0.25 * self.config.inventory_limit
    }

    fn pull_quotes(&mut self, ctx: &StrategyContext) {
        for slot in [self.active_bid.take(), self.active_ask.take()] {
            if let Some(order_id) = slot {
                // The quote may have filled or died while we decided
                if let Err(e) = ctx.cancel(&order_id) {
                    debug!(order_id = %order_id, error = %e, "quote cancel skipped");
                }
            }
        }
    }

    fn place_quotes(&mut self, ctx: &StrategyContext, mid: f64, spread: f64) {
        let skew = self.inventory * self.config.skew_factor;
        let bid_price = mid * (1.0 - spread / 2.0 + skew);
        let ask_price = mid * (1.0 + spread / 2.0 + skew);
        let size = self.config.order_size;

        // A side that would push |inventory| past the limit is skipped
        if (self.inventory + size).abs() <= self.config.inventory_limit {
            match ctx.submit(Order::limit(&self.symbol, Side::Buy, bid_price, size), &self.venue) {
                Ok(order_id) => {
                    self.my_orders.insert(order_id.clone());
                    self.active_bid = Some(order_id);
                }
                Err(e) => debug!(error = %e, "bid quote rejected"),
            }
        } else {
            debug!(inventory = self.inventory, "bid side skipped at inventory limit");
        }
        if (self.inventory - size).abs() <= self.config.inventory_limit {
            match ctx.submit(Order::limit(&self.symbol, Side::Sell, ask_price, size), &self.venue) {
                Ok(order_id) => {
                    self.my_orders.insert(order_id.clone());
                    self.active_ask = Some(order_id);
                }
                Err(e) => debug!(error = %e, "ask quote rejected"),
            }
        } else {
            debug!(inventory = self.inventory, "ask side skipped at inventory limit");
        }

        self.last_quote_mid = Some(mid);
        self.inventory_at_quote = self.inventory;
        self.quote_filled = false;
    }
}

impl StrategyLogic for MarketMaker {
    fn on_initialize(&mut self, _ctx: &StrategyContext) -> Result<()> {
        self.mids.clear();
        self.inventory = 0.0;
        self.inventory_at_quote = 0.0;
        self.last_quote_mid = None;
        self.active_bid = None;
        self.active_ask = None;
        self.quote_filled = false;
        self.my_orders.clear();
        Ok(())
    }

    fn on_start(&mut self, _ctx: &StrategyContext) -> Result<()> {
        info!(symbol = %self.symbol, venue = %self.venue, "market maker started");
        Ok(())
    }

    fn on_stop(&mut self, _ctx: &StrategyContext) -> Result<()> {
        // The shell cancels tracked orders right after this hook
        self.active_bid = None;
        self.active_ask = None;
        Ok(())
    }

    fn on_market_data(&mut self, ctx: &StrategyContext, data: &MarketData) -> Result<()> {
        if data.symbol != self.symbol {
            return Ok(());
        }
        let mid = match data.mid() {
            Some(mid) => mid,
            None if data.last_price > 0.0 => data.last_price,
            None => return Ok(()),
        };

        self.mids.push_back(mid);
        while self.mids.len() > self.config.price_queue_size {
            self.mids.pop_front();
        }

        let spread = self.target_spread();
        if !self.should_requote(mid, spread) {
            return Ok(());
        }

        self.pull_quotes(ctx);
        self.place_quotes(ctx, mid, spread);
        Ok(())
    }

    fn on_order_update(&mut self, _ctx: &StrategyContext, update: &OrderUpdate) -> Result<()> {
        if !update.status.is_terminal() {
            return Ok(());
        }
        if self.active_bid.as_ref() == Some(&update.order_id) {
            self.active_bid = None;
            if update.status == OrderStatus::Filled {
                self.quote_filled = true;
            }
        }
        if self.active_ask.as_ref() == Some(&update.order_id) {
            self.active_ask = None;
            if update.status == OrderStatus::Filled {
                self.quote_filled = true;
            }
        }
        Ok(())
    }

    fn on_trade_update(&mut self, _ctx: &StrategyContext, update: &TradeUpdate) -> Result<()> {
        if update.symbol != self.symbol || !self.my_orders.contains(&update.order_id) {
            return Ok(());
        }
        self.inventory += update.side.sign() * update.volume;
        debug!(inventory = self.inventory, "inventory updated");
        Ok(())
    }
}
