//! Unit tests for the market maker

use crate::helpers::{fill_for, partial_fill_for, recording_ctx, tick};
use common::types::{OrderStatus, OrderType, OrderUpdate, Side, Ts};
use rstest::*;
use strategies::{MarketMaker, MarketMakerConfig, StrategyLogic};

fn config() -> MarketMakerConfig {
    MarketMakerConfig {
        base_spread: 0.004,
        vol_multiplier: 0.0,
        min_spread: 0.001,
        max_spread: 0.02,
        skew_factor: 0.0,
        order_size: 0.5,
        inventory_limit: 1.0,
        price_queue_size: 10,
    }
}

#[fixture]
fn maker() -> MarketMaker {
    MarketMaker::new(config(), "BTCUSDT", "sim")
}

fn filled(order_id: &common::types::OrderId) -> OrderUpdate {
    OrderUpdate {
        order_id: order_id.clone(),
        status: OrderStatus::Filled,
        filled_price: 100.0,
        filled_volume: 0.5,
        timestamp: Ts::now(),
        message: String::new(),
    }
}

#[rstest]
fn quotes_both_sides_around_the_mid(mut maker: MarketMaker) {
    let (gateway, ctx) = recording_ctx("maker");
    maker.on_initialize(&ctx).unwrap();
    maker.on_market_data(&ctx, &tick("BTCUSDT", 100.0)).unwrap();

    let submitted = gateway.submitted();
    assert_eq!(submitted.len(), 2);
    let bid = &submitted[0].1;
    let ask = &submitted[1].1;
    assert_eq!(bid.side, Side::Buy);
    assert_eq!(ask.side, Side::Sell);
    assert_eq!(bid.order_type, OrderType::Limit);
    // Flat inventory, zero vol weight: half-spread of base_spread / 2
    assert!((bid.price.unwrap() - 100.0 * 0.998).abs() < 1e-6);
    assert!((ask.price.unwrap() - 100.0 * 1.002).abs() < 1e-6);
    assert!((bid.volume - 0.5).abs() < 1e-12);
}

#[rstest]
fn holds_quotes_on_small_moves(mut maker: MarketMaker) {
    let (gateway, ctx) = recording_ctx("maker");
    maker.on_initialize(&ctx).unwrap();
    maker.on_market_data(&ctx, &tick("BTCUSDT", 100.0)).unwrap();
    assert_eq!(gateway.submit_count(), 2);

    // Move well under spread/4 = 0.1%: quotes stay
    maker.on_market_data(&ctx, &tick("BTCUSDT", 100.02)).unwrap();
    assert_eq!(gateway.submit_count(), 2);
    assert!(gateway.cancelled().is_empty());
}

#[rstest]
fn reprices_after_a_large_move(mut maker: MarketMaker) {
    let (gateway, ctx) = recording_ctx("maker");
    maker.on_initialize(&ctx).unwrap();
    maker.on_market_data(&ctx, &tick("BTCUSDT", 100.0)).unwrap();

    // 1% move clears the spread/4 trigger: pull both, quote both
    maker.on_market_data(&ctx, &tick("BTCUSDT", 101.0)).unwrap();
    assert_eq!(gateway.submit_count(), 4);
    assert_eq!(gateway.cancelled().len(), 2);
}

#[rstest]
fn filled_quote_triggers_a_requote(mut maker: MarketMaker) {
    let (gateway, ctx) = recording_ctx("maker");
    maker.on_initialize(&ctx).unwrap();
    maker.on_market_data(&ctx, &tick("BTCUSDT", 100.0)).unwrap();
    let (bid_id, bid_order, _) = gateway.submitted()[0].clone();

    // The bid fills completely
    maker.on_trade_update(&ctx, &fill_for(&bid_id, &bid_order, 99.8)).unwrap();
    maker.on_order_update(&ctx, &filled(&bid_id)).unwrap();
    assert!((maker.inventory() - 0.5).abs() < 1e-12);

    // Next tick requotes even though the mid barely moved
    maker.on_market_data(&ctx, &tick("BTCUSDT", 100.01)).unwrap();
    assert!(gateway.submit_count() > 2);
}

#[rstest]
fn inventory_swing_triggers_a_requote(mut maker: MarketMaker) {
    let (gateway, ctx) = recording_ctx("maker");
    maker.on_initialize(&ctx).unwrap();
    maker.on_market_data(&ctx, &tick("BTCUSDT", 100.0)).unwrap();
    let (bid_id, bid_order, _) = gateway.submitted()[0].clone();

    // A partial fill moves inventory past 25% of the limit without any
    // terminal order update
    maker
        .on_trade_update(&ctx, &partial_fill_for(&bid_id, &bid_order, 99.8, 0.3))
        .unwrap();
    assert!((maker.inventory() - 0.3).abs() < 1e-12);

    maker.on_market_data(&ctx, &tick("BTCUSDT", 100.01)).unwrap();
    assert_eq!(gateway.submit_count(), 4, "inventory swing forces requote");
}

#[rstest]
fn inventory_limit_skips_the_growing_side() {
    let mut maker = MarketMaker::new(
        MarketMakerConfig {
            order_size: 0.6,
            ..config()
        },
        "BTCUSDT",
        "sim",
    );
    let (gateway, ctx) = recording_ctx("maker");
    maker.on_initialize(&ctx).unwrap();
    maker.on_market_data(&ctx, &tick("BTCUSDT", 100.0)).unwrap();
    assert_eq!(gateway.submit_count(), 2);
    let (bid_id, bid_order, _) = gateway.submitted()[0].clone();

    // Buying 0.6 puts inventory at 0.6; another 0.6 would breach 1.0
    maker.on_trade_update(&ctx, &fill_for(&bid_id, &bid_order, 99.8)).unwrap();
    maker.on_order_update(&ctx, &filled(&bid_id)).unwrap();
    maker.on_market_data(&ctx, &tick("BTCUSDT", 100.0)).unwrap();

    let submitted = gateway.submitted();
    assert_eq!(submitted.len(), 3, "only the reducing side is quoted");
    assert_eq!(submitted[2].1.side, Side::Sell);
}

#[rstest]
fn ignores_fills_of_other_strategies(mut maker: MarketMaker) {
    let (gateway, ctx) = recording_ctx("maker");
    maker.on_initialize(&ctx).unwrap();
    maker.on_market_data(&ctx, &tick("BTCUSDT", 100.0)).unwrap();
    let foreign = common::types::OrderId::new("OTHER-1");
    let foreign_order = common::types::Order::limit("BTCUSDT", Side::Buy, 99.0, 2.0);
    maker
        .on_trade_update(&ctx, &fill_for(&foreign, &foreign_order, 99.0))
        .unwrap();
    assert_eq!(maker.inventory(), 0.0);
    drop(gateway);
}
