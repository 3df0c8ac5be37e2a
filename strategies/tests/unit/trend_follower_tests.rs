//! Unit tests for the trend follower

use crate::helpers::{assert_market, fill_for, recording_ctx, tick};
use common::types::Side;
use numerics::{CpuBackend, NumericsBackend, NumericsError, OptionQuote, SimulationParams};
use rstest::*;
use std::sync::Arc;
use strategies::{StrategyLogic, TrendFollower, TrendFollowerConfig};

fn config() -> TrendFollowerConfig {
    TrendFollowerConfig {
        short_period: 3,
        long_period: 10,
        atr_period: 3,
        position_size: 1.0,
        max_position_size: 5.0,
        stop_loss_pct: 0.02,
        take_profit_pct: 0.04,
        atr_multiplier: 1.0,
    }
}

#[fixture]
fn follower() -> TrendFollower {
    TrendFollower::new(config(), "BTCUSDT", "sim", Arc::new(CpuBackend::new()))
}

#[rstest]
fn single_buy_at_bullish_crossover(mut follower: TrendFollower) {
    let (gateway, ctx) = recording_ctx("trend");
    follower.on_initialize(&ctx).unwrap();

    // Rising closes 100..=120: the cross fires once when both MAs exist,
    // and never again while short stays above long
    for price in 100..=120 {
        follower.on_market_data(&ctx, &tick("BTCUSDT", f64::from(price))).unwrap();
    }
    let submitted = gateway.submitted();
    assert_eq!(submitted.len(), 1, "exactly one entry per cross");
    // Unit moves give ATR 1, so size = position_size * atr_multiplier / 1
    assert_market(&submitted[0].1, Side::Buy, 1.0);
}

#[rstest]
fn opposite_cross_flips_the_signal(mut follower: TrendFollower) {
    let (gateway, ctx) = recording_ctx("trend");
    follower.on_initialize(&ctx).unwrap();

    for price in 100..=115 {
        follower.on_market_data(&ctx, &tick("BTCUSDT", f64::from(price))).unwrap();
    }
    assert_eq!(gateway.submit_count(), 1);

    // No position was filled, so the decline produces a single short entry
    for price in (95..=114).rev() {
        follower.on_market_data(&ctx, &tick("BTCUSDT", f64::from(price))).unwrap();
    }
    let submitted = gateway.submitted();
    assert_eq!(submitted.len(), 2, "one entry per cross direction");
    assert_eq!(submitted[1].1.side, Side::Sell);
}

#[rstest]
fn ignores_other_symbols(mut follower: TrendFollower) {
    let (gateway, ctx) = recording_ctx("trend");
    follower.on_initialize(&ctx).unwrap();
    for price in 100..=120 {
        follower.on_market_data(&ctx, &tick("ETHUSDT", f64::from(price))).unwrap();
    }
    assert_eq!(gateway.submit_count(), 0);
}

#[rstest]
fn take_profit_closes_the_position(mut follower: TrendFollower) {
    let (gateway, ctx) = recording_ctx("trend");
    follower.on_initialize(&ctx).unwrap();

    for price in 100..=110 {
        follower.on_market_data(&ctx, &tick("BTCUSDT", f64::from(price))).unwrap();
    }
    let submitted = gateway.submitted();
    assert_eq!(submitted.len(), 1);
    let (entry_id, entry_order, _) = submitted[0].clone();

    // Fill the entry at 110: stop 107.8, target 114.4
    follower
        .on_trade_update(&ctx, &fill_for(&entry_id, &entry_order, 110.0))
        .unwrap();
    assert!((follower.position() - 1.0).abs() < 1e-12);

    for price in [111.0, 112.0, 113.0, 114.0] {
        follower.on_market_data(&ctx, &tick("BTCUSDT", price)).unwrap();
    }
    assert_eq!(gateway.submit_count(), 1, "target not yet breached");

    follower.on_market_data(&ctx, &tick("BTCUSDT", 114.5)).unwrap();
    let submitted = gateway.submitted();
    assert_eq!(submitted.len(), 2, "breach closes the position");
    assert_market(&submitted[1].1, Side::Sell, 1.0);

    // The close is in flight: further breaches do not stack closes
    follower.on_market_data(&ctx, &tick("BTCUSDT", 115.0)).unwrap();
    assert_eq!(gateway.submit_count(), 2);

    // Fill the close: flat again with exit levels cleared
    let (close_id, close_order, _) = gateway.submitted()[1].clone();
    follower
        .on_trade_update(&ctx, &fill_for(&close_id, &close_order, 114.5))
        .unwrap();
    assert_eq!(follower.position(), 0.0);
}

#[rstest]
fn stop_loss_closes_a_short(mut follower: TrendFollower) {
    let (gateway, ctx) = recording_ctx("trend");
    follower.on_initialize(&ctx).unwrap();

    // Build a bearish cross: rise to 110 then fall to 100
    for price in 100..=110 {
        follower.on_market_data(&ctx, &tick("BTCUSDT", f64::from(price))).unwrap();
    }
    for price in (100..=109).rev() {
        follower.on_market_data(&ctx, &tick("BTCUSDT", f64::from(price))).unwrap();
    }
    let submitted = gateway.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[1].1.side, Side::Sell);
    let (short_id, short_order, _) = submitted[1].clone();

    // Fill the short at 100: stop 102, target 96
    follower
        .on_trade_update(&ctx, &fill_for(&short_id, &short_order, 100.0))
        .unwrap();
    assert!(follower.position() < 0.0);

    follower.on_market_data(&ctx, &tick("BTCUSDT", 102.5)).unwrap();
    let submitted = gateway.submitted();
    assert_eq!(submitted.len(), 3, "stop breached");
    assert_eq!(submitted[2].1.side, Side::Buy);
}

/// Backend that always fails, for the skip-tick contract
struct UnavailableBackend;

impl NumericsBackend for UnavailableBackend {
    fn moving_average(&self, _: &[f64], _: usize) -> Result<Vec<f64>, NumericsError> {
        Err(NumericsError::Unavailable)
    }
    fn ema(&self, _: &[f64], _: f64) -> Result<Vec<f64>, NumericsError> {
        Err(NumericsError::Unavailable)
    }
    fn bollinger(
        &self,
        _: &[f64],
        _: usize,
        _: f64,
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), NumericsError> {
        Err(NumericsError::Unavailable)
    }
    fn rsi(&self, _: &[f64], _: usize) -> Result<Vec<f64>, NumericsError> {
        Err(NumericsError::Unavailable)
    }
    fn black_scholes(&self, _: &[OptionQuote]) -> Result<(Vec<f64>, Vec<f64>), NumericsError> {
        Err(NumericsError::Unavailable)
    }
    fn monte_carlo(
        &self,
        _: &SimulationParams,
        _: usize,
        _: usize,
    ) -> Result<Vec<Vec<f64>>, NumericsError> {
        Err(NumericsError::Unavailable)
    }
    fn portfolio_optimize(
        &self,
        _: &[f64],
        _: &[Vec<f64>],
        _: f64,
        _: f64,
    ) -> Result<Vec<f64>, NumericsError> {
        Err(NumericsError::Unavailable)
    }
    fn value_at_risk(
        &self,
        _: &[Vec<f64>],
        _: &[f64],
        _: f64,
        _: u32,
    ) -> Result<f64, NumericsError> {
        Err(NumericsError::Unavailable)
    }
}

#[rstest]
fn numerics_failure_skips_the_tick_only() {
    let mut follower =
        TrendFollower::new(config(), "BTCUSDT", "sim", Arc::new(UnavailableBackend));
    let (gateway, ctx) = recording_ctx("trend");
    follower.on_initialize(&ctx).unwrap();
    for price in 100..=120 {
        // The hook must stay Ok even though every indicator call fails
        follower.on_market_data(&ctx, &tick("BTCUSDT", f64::from(price))).unwrap();
    }
    assert_eq!(gateway.submit_count(), 0);
}
