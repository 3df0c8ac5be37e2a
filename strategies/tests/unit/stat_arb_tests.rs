//! Unit tests for the pair arbitrage strategy

use crate::helpers::{fill_for, recording_ctx, tick};
use common::types::{Order, OrderId, Side};
use rstest::*;
use strategies::{PairConfig, StatArbConfig, StatArbitrage, StrategyContext, StrategyLogic};

fn config() -> StatArbConfig {
    StatArbConfig {
        lookback_period: 60,
        entry_z: 2.0,
        exit_z: 0.8,
        stop_loss_z: 2.5,
        corr_threshold: 0.9,
        min_observations: 20,
        position_size: 1.0,
        max_position_size: 10.0,
    }
}

fn pair() -> PairConfig {
    PairConfig {
        id: "AB".to_string(),
        symbol_a: "AAAUSDT".to_string(),
        symbol_b: "BBBUSDT".to_string(),
        venue: "sim".to_string(),
    }
}

/// Leg B price for warmup step `i`: a swinging series so leg log-returns
/// co-move strongly and the regression has signal
fn leg_b(i: usize) -> f64 {
    100.0 + 30.0 * (i as f64).sin()
}

/// Feed one aligned observation: B first, then A at `b + spread`
fn observe(strategy: &mut StatArbitrage, ctx: &StrategyContext, i: usize, spread: f64) {
    let b = leg_b(i);
    strategy.on_market_data(ctx, &tick("BBBUSDT", b)).unwrap();
    strategy.on_market_data(ctx, &tick("AAAUSDT", b + spread)).unwrap();
}

/// Alternating unit spreads: mean 0, population stdev 1
fn warmup_spread(i: usize) -> f64 {
    if i % 2 == 0 {
        1.0
    } else {
        -1.0
    }
}

fn fill_all(
    strategy: &mut StatArbitrage,
    ctx: &StrategyContext,
    orders: &[(OrderId, Order, String)],
) {
    for (order_id, order, _) in orders {
        strategy
            .on_trade_update(ctx, &fill_for(order_id, order, order.price.unwrap_or(1_000.0)))
            .unwrap();
    }
}

#[rstest]
fn no_entry_during_warmup() {
    let mut strategy = StatArbitrage::new(config(), vec![pair()]);
    let (gateway, ctx) = recording_ctx("arb");
    strategy.on_initialize(&ctx).unwrap();
    for i in 0..30 {
        observe(&mut strategy, &ctx, i, warmup_spread(i));
    }
    assert_eq!(gateway.submit_count(), 0, "unit spreads stay inside entry_z");
}

#[rstest]
fn wide_spread_opens_short_and_reversion_closes_it() {
    let mut strategy = StatArbitrage::new(config(), vec![pair()]);
    let (gateway, ctx) = recording_ctx("arb");
    strategy.on_initialize(&ctx).unwrap();
    for i in 0..30 {
        observe(&mut strategy, &ctx, i, warmup_spread(i));
    }

    // Spread blows out far above the mean: short the spread, sell A buy B
    observe(&mut strategy, &ctx, 30, 6.0);
    let entries = gateway.submitted();
    assert_eq!(entries.len(), 2, "two legs on entry");
    let leg_a = entries.iter().find(|(_, o, _)| o.symbol == "AAAUSDT").unwrap();
    let leg_b_order = entries.iter().find(|(_, o, _)| o.symbol == "BBBUSDT").unwrap();
    assert_eq!(leg_a.1.side, Side::Sell);
    assert_eq!(leg_b_order.1.side, Side::Buy);
    assert!(leg_a.1.volume > 0.0);
    fill_all(&mut strategy, &ctx, &entries);
    let (pos_a, pos_b) = strategy.pair_positions("AB").unwrap();
    assert!(pos_a < 0.0 && pos_b > 0.0);

    // Spread reverts through the mean: both legs close
    observe(&mut strategy, &ctx, 31, -2.0);
    let all = gateway.submitted();
    assert_eq!(all.len(), 4, "two closing legs");
    let closes = &all[2..];
    let close_a = closes.iter().find(|(_, o, _)| o.symbol == "AAAUSDT").unwrap();
    let close_b = closes.iter().find(|(_, o, _)| o.symbol == "BBBUSDT").unwrap();
    assert_eq!(close_a.1.side, Side::Buy);
    assert_eq!(close_b.1.side, Side::Sell);
    assert!((close_a.1.volume - pos_a.abs()).abs() < 1e-9);
    fill_all(&mut strategy, &ctx, &closes.to_vec());
    let (pos_a, pos_b) = strategy.pair_positions("AB").unwrap();
    assert!(pos_a.abs() < 1e-9 && pos_b.abs() < 1e-9);
}

#[rstest]
fn stop_exit_on_a_blowout_while_long() {
    let mut strategy = StatArbitrage::new(config(), vec![pair()]);
    let (gateway, ctx) = recording_ctx("arb");
    strategy.on_initialize(&ctx).unwrap();
    for i in 0..30 {
        observe(&mut strategy, &ctx, i, warmup_spread(i));
    }

    // Spread collapses far below the mean: long the spread, buy A sell B
    observe(&mut strategy, &ctx, 30, -6.0);
    let entries = gateway.submitted();
    assert_eq!(entries.len(), 2);
    let leg_a = entries.iter().find(|(_, o, _)| o.symbol == "AAAUSDT").unwrap();
    assert_eq!(leg_a.1.side, Side::Buy);
    fill_all(&mut strategy, &ctx, &entries);

    // Spread blows out the other way past the stop: both legs close
    observe(&mut strategy, &ctx, 31, 8.0);
    let all = gateway.submitted();
    assert_eq!(all.len(), 4, "stop closes both legs");
    let close_a = all[2..].iter().find(|(_, o, _)| o.symbol == "AAAUSDT").unwrap();
    assert_eq!(close_a.1.side, Side::Sell);
}

#[rstest]
fn uncorrelated_legs_never_trade() {
    let mut strategy = StatArbitrage::new(
        StatArbConfig {
            // Impossible threshold: the gate must hold even on wide spreads
            corr_threshold: 1.1,
            ..config()
        },
        vec![pair()],
    );
    let (gateway, ctx) = recording_ctx("arb");
    strategy.on_initialize(&ctx).unwrap();
    for i in 0..30 {
        observe(&mut strategy, &ctx, i, warmup_spread(i));
    }
    observe(&mut strategy, &ctx, 30, 6.0);
    assert_eq!(gateway.submit_count(), 0);
}

#[rstest]
fn stop_hook_closes_open_pairs() {
    let mut strategy = StatArbitrage::new(config(), vec![pair()]);
    let (gateway, ctx) = recording_ctx("arb");
    strategy.on_initialize(&ctx).unwrap();
    for i in 0..30 {
        observe(&mut strategy, &ctx, i, warmup_spread(i));
    }
    observe(&mut strategy, &ctx, 30, 6.0);
    let entries = gateway.submitted();
    assert_eq!(entries.len(), 2);
    fill_all(&mut strategy, &ctx, &entries);

    strategy.on_stop(&ctx).unwrap();
    assert_eq!(gateway.submit_count(), 4, "stop flattens both legs");
}
