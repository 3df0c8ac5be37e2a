//! Pair statistical arbitrage
//!
//! Each configured pair keeps aligned leg price histories, estimates the
//! hedge ratio by OLS on log-returns, and trades the z-score of the
//! spread `priceA - beta * priceB` against entry, exit and stop
//! thresholds. Leg sizes scale inversely with spread volatility; leg B is
//! scaled by beta.

use crate::lifecycle::{StrategyContext, StrategyLogic};
use anyhow::Result;
use common::config::StrategySettings;
use common::types::{MarketData, Order, OrderId, Side, TradeUpdate};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

const FLAT_EPS: f64 = 1e-9;

/// One traded pair; symbols and venue are configuration, never derived
#[derive(Debug, Clone)]
pub struct PairConfig {
    /// Pair identifier used in logs
    pub id: String,
    /// Leg A symbol
    pub symbol_a: String,
    /// Leg B symbol
    pub symbol_b: String,
    /// Venue both legs trade on
    pub venue: String,
}

/// Statistical arbitrage parameters
#[derive(Debug, Clone)]
pub struct StatArbConfig {
    /// Rolling window for spread statistics and return regressions
    pub lookback_period: usize,
    /// |Z| to open a position
    pub entry_z: f64,
    /// |Z| inside which an open position is closed
    pub exit_z: f64,
    /// |Z| beyond which an open position is stopped out
    pub stop_loss_z: f64,
    /// Minimum |correlation| of leg log-returns to trade
    pub corr_threshold: f64,
    /// Samples required before any signal
    pub min_observations: usize,
    /// Base leg size before volatility scaling
    pub position_size: f64,
    /// Hard cap per leg
    pub max_position_size: f64,
}

impl Default for StatArbConfig {
    fn default() -> Self {
        Self {
            lookback_period: 100,
            entry_z: 2.0,
            exit_z: 0.5,
            stop_loss_z: 4.0,
            corr_threshold: 0.8,
            min_observations: 30,
            position_size: 1.0,
            max_position_size: 10.0,
        }
    }
}

impl StatArbConfig {
    /// Read parameters out of strategy settings, keeping defaults for
    /// missing keys
    #[must_use]
    pub fn from_settings(settings: &StrategySettings) -> Self {
        let d = Self::default();
        Self {
            lookback_period: settings.param("lookback_period", d.lookback_period as f64) as usize,
            entry_z: settings.param("entry_z", d.entry_z),
            exit_z: settings.param("exit_z", d.exit_z),
            stop_loss_z: settings.param("stop_loss_z", d.stop_loss_z),
            corr_threshold: settings.param("corr_threshold", d.corr_threshold),
            min_observations: settings.param("min_observations", d.min_observations as f64) as usize,
            position_size: settings.param("position_size", d.position_size),
            max_position_size: settings.param("max_position_size", d.max_position_size),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpreadSide {
    /// Long A, short B (entered on a low z-score)
    Long,
    /// Short A, long B (entered on a high z-score)
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    A,
    B,
}

struct PairState {
    last_a: Option<f64>,
    last_b: Option<f64>,
    fresh_a: bool,
    fresh_b: bool,
    hist_a: VecDeque<f64>,
    hist_b: VecDeque<f64>,
    spreads: VecDeque<f64>,
    beta: f64,
    corr: f64,
    mean: f64,
    stdev: f64,
    pos_a: f64,
    pos_b: f64,
    side: Option<SpreadSide>,
    entry_spread: f64,
}

impl PairState {
    fn new() -> Self {
        Self {
            last_a: None,
            last_b: None,
            fresh_a: false,
            fresh_b: false,
            hist_a: VecDeque::new(),
            hist_b: VecDeque::new(),
            spreads: VecDeque::new(),
            beta: 1.0,
            corr: 0.0,
            mean: 0.0,
            stdev: 0.0,
            pos_a: 0.0,
            pos_b: 0.0,
            side: None,
            entry_spread: 0.0,
        }
    }

    fn is_flat(&self) -> bool {
        self.side.is_none() && self.pos_a.abs() < FLAT_EPS && self.pos_b.abs() < FLAT_EPS
    }
}

fn log_returns(prices: &VecDeque<f64>) -> Vec<f64> {
    prices
        .iter()
        .zip(prices.iter().skip(1))
        .map(|(a, b)| (b / a).ln())
        .collect()
}

fn mean_of(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Reference pair arbitrage strategy
pub struct StatArbitrage {
    config: StatArbConfig,
    pairs: Vec<PairConfig>,
    states: Vec<PairState>,
    orders: FxHashMap<OrderId, (usize, Leg)>,
}

impl StatArbitrage {
    /// Build the strategy over configured pairs
    #[must_use]
    pub fn new(config: StatArbConfig, pairs: Vec<PairConfig>) -> Self {
        let states = pairs.iter().map(|_| PairState::new()).collect();
        Self {
            config,
            pairs,
            states,
            orders: FxHashMap::default(),
        }
    }

    /// Leg positions of a pair, by pair id
    #[must_use]
    pub fn pair_positions(&self, pair_id: &str) -> Option<(f64, f64)> {
        self.pairs
            .iter()
            .position(|p| p.id == pair_id)
            .map(|i| (self.states[i].pos_a, self.states[i].pos_b))
    }

    fn update_regression(state: &mut PairState, min_observations: usize) {
        if state.hist_a.len() < min_observations.max(3) {
            return;
        }
        let ra = log_returns(&state.hist_a);
        let rb = log_returns(&state.hist_b);
        let n = ra.len().min(rb.len());
        if n < 2 {
            return;
        }
        let (ra, rb) = (&ra[..n], &rb[..n]);
        let mean_a = mean_of(ra);
        let mean_b = mean_of(rb);
        let mut cov = 0.0;
        let mut var_a = 0.0;
        let mut var_b = 0.0;
        for i in 0..n {
            let da = ra[i] - mean_a;
            let db = rb[i] - mean_b;
            cov += da * db;
            var_a += da * da;
            var_b += db * db;
        }
        // Degenerate series keep the previous estimates
        if var_b > 1e-18 {
            state.beta = cov / var_b;
        }
        if var_a > 1e-18 && var_b > 1e-18 {
            state.corr = cov / (var_a.sqrt() * var_b.sqrt());
        }
    }

    fn update_spread(state: &mut PairState, lookback: usize) -> Option<f64> {
        let (a, b) = (state.last_a?, state.last_b?);
        let spread = a - state.beta * b;
        state.spreads.push_back(spread);
        while state.spreads.len() > lookback {
            state.spreads.pop_front();
        }
        let n = state.spreads.len() as f64;
        state.mean = state.spreads.iter().sum::<f64>() / n;
        state.stdev = (state
            .spreads
            .iter()
            .map(|s| (s - state.mean) * (s - state.mean))
            .sum::<f64>()
            / n)
            .sqrt();
        Some(spread)
    }

    fn leg_sizes(&self, state: &PairState) -> (f64, f64) {
        let base = if state.stdev > 0.0 {
            (self.config.position_size / state.stdev).clamp(0.0, self.config.max_position_size)
        } else {
            0.0
        };
        (base, (base * state.beta.abs()).min(self.config.max_position_size))
    }

    fn enter(&mut self, ctx: &StrategyContext, pair_idx: usize, short_spread: bool, spread: f64) {
        let state = &self.states[pair_idx];
        let (size_a, size_b) = self.leg_sizes(state);
        if size_a <= 0.0 || size_b <= 0.0 {
            return;
        }
        let pair = self.pairs[pair_idx].clone();
        let (side_a, side_b) = if short_spread {
            (Side::Sell, Side::Buy)
        } else {
            (Side::Buy, Side::Sell)
        };
        info!(pair = %pair.id, direction = if short_spread { "short" } else { "long" }, spread,
            "entering pair trade");
        let mut submitted = false;
        match ctx.submit(Order::market(&pair.symbol_a, side_a, size_a), &pair.venue) {
            Ok(order_id) => {
                self.orders.insert(order_id, (pair_idx, Leg::A));
                submitted = true;
            }
            Err(e) => warn!(pair = %pair.id, error = %e, "leg A rejected"),
        }
        match ctx.submit(Order::market(&pair.symbol_b, side_b, size_b), &pair.venue) {
            Ok(order_id) => {
                self.orders.insert(order_id, (pair_idx, Leg::B));
                submitted = true;
            }
            Err(e) => warn!(pair = %pair.id, error = %e, "leg B rejected"),
        }
        if submitted {
            let state = &mut self.states[pair_idx];
            state.side = Some(if short_spread {
                SpreadSide::Short
            } else {
                SpreadSide::Long
            });
            state.entry_spread = spread;
        }
    }

    fn exit(&mut self, ctx: &StrategyContext, pair_idx: usize, reason: &str) {
        let (pos_a, pos_b) = {
            let state = &self.states[pair_idx];
            (state.pos_a, state.pos_b)
        };
        let pair = self.pairs[pair_idx].clone();
        info!(pair = %pair.id, reason, "exiting pair trade");
        if pos_a.abs() >= FLAT_EPS {
            let side = if pos_a > 0.0 { Side::Sell } else { Side::Buy };
            match ctx.submit(Order::market(&pair.symbol_a, side, pos_a.abs()), &pair.venue) {
                Ok(order_id) => {
                    self.orders.insert(order_id, (pair_idx, Leg::A));
                }
                Err(e) => warn!(pair = %pair.id, error = %e, "leg A close rejected"),
            }
        }
        if pos_b.abs() >= FLAT_EPS {
            let side = if pos_b > 0.0 { Side::Sell } else { Side::Buy };
            match ctx.submit(Order::market(&pair.symbol_b, side, pos_b.abs()), &pair.venue) {
                Ok(order_id) => {
                    self.orders.insert(order_id, (pair_idx, Leg::B));
                }
                Err(e) => warn!(pair = %pair.id, error = %e, "leg B close rejected"),
            }
        }
        self.states[pair_idx].side = None;
    }

    fn evaluate_pair(&mut self, ctx: &StrategyContext, pair_idx: usize) {
        {
            let state = &mut self.states[pair_idx];
            if !(state.fresh_a && state.fresh_b) {
                return;
            }
            state.fresh_a = false;
            state.fresh_b = false;

            let (a, b) = match (state.last_a, state.last_b) {
                (Some(a), Some(b)) => (a, b),
                _ => return,
            };
            state.hist_a.push_back(a);
            state.hist_b.push_back(b);
            while state.hist_a.len() > self.config.lookback_period + 1 {
                state.hist_a.pop_front();
                state.hist_b.pop_front();
            }
            Self::update_regression(state, self.config.min_observations);
        }

        let spread = match Self::update_spread(&mut self.states[pair_idx], self.config.lookback_period) {
            Some(spread) => spread,
            None => return,
        };

        let (z, tradeable, flat, side) = {
            let state = &self.states[pair_idx];
            if state.spreads.len() < self.config.min_observations || state.stdev <= 0.0 {
                return;
            }
            let z = (spread - state.mean) / state.stdev;
            let tradeable = state.corr.abs() >= self.config.corr_threshold;
            (z, tradeable, state.is_flat(), state.side)
        };
        debug!(pair = %self.pairs[pair_idx].id, z, spread, "pair evaluated");

        match side {
            None if flat && tradeable => {
                if z > self.config.entry_z {
                    self.enter(ctx, pair_idx, true, spread);
                } else if z < -self.config.entry_z {
                    self.enter(ctx, pair_idx, false, spread);
                }
            }
            Some(open) => {
                let stop = z.abs() > self.config.stop_loss_z;
                let reverted = match open {
                    SpreadSide::Long => z >= -self.config.exit_z,
                    SpreadSide::Short => z <= self.config.exit_z,
                };
                if stop {
                    self.exit(ctx, pair_idx, "stop");
                } else if reverted {
                    self.exit(ctx, pair_idx, "reverted");
                }
            }
            None => {}
        }
    }
}

impl StrategyLogic for StatArbitrage {
    fn on_initialize(&mut self, _ctx: &StrategyContext) -> Result<()> {
        for state in &mut self.states {
            *state = PairState::new();
        }
        self.orders.clear();
        Ok(())
    }

    fn on_start(&mut self, _ctx: &StrategyContext) -> Result<()> {
        info!(pairs = self.pairs.len(), "statistical arbitrage started");
        Ok(())
    }

    fn on_stop(&mut self, ctx: &StrategyContext) -> Result<()> {
        for pair_idx in 0..self.pairs.len() {
            let open = {
                let state = &self.states[pair_idx];
                state.pos_a.abs() >= FLAT_EPS || state.pos_b.abs() >= FLAT_EPS
            };
            if open {
                self.exit(ctx, pair_idx, "strategy stop");
            }
        }
        Ok(())
    }

    fn on_market_data(&mut self, ctx: &StrategyContext, data: &MarketData) -> Result<()> {
        if data.last_price <= 0.0 {
            return Ok(());
        }
        for pair_idx in 0..self.pairs.len() {
            let touches = {
                let pair = &self.pairs[pair_idx];
                let state = &mut self.states[pair_idx];
                if data.symbol == pair.symbol_a {
                    state.last_a = Some(data.last_price);
                    state.fresh_a = true;
                    true
                } else if data.symbol == pair.symbol_b {
                    state.last_b = Some(data.last_price);
                    state.fresh_b = true;
                    true
                } else {
                    false
                }
            };
            if touches {
                self.evaluate_pair(ctx, pair_idx);
            }
        }
        Ok(())
    }

    fn on_trade_update(&mut self, _ctx: &StrategyContext, update: &TradeUpdate) -> Result<()> {
        let Some((pair_idx, leg)) = self.orders.get(&update.order_id).copied() else {
            return Ok(());
        };
        let state = &mut self.states[pair_idx];
        let delta = update.side.sign() * update.volume;
        match leg {
            Leg::A => state.pos_a += delta,
            Leg::B => state.pos_b += delta,
        }
        debug!(pair = %self.pairs[pair_idx].id, pos_a = state.pos_a, pos_b = state.pos_b,
            "pair position updated");
        Ok(())
    }
}
