//! Pre-trade risk engine
//!
//! Admission and position/equity tracking share one mutex, so an `admit`
//! decision is atomic with respect to concurrent fills on the same
//! position. Disabling the engine short-circuits admission only; tracking
//! continues.

use chrono::{NaiveDate, Utc};
use common::config::RiskLimits;
use common::error::RejectReason;
use common::types::{Order, Position, TradeUpdate};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

struct RiskBook {
    limits: RiskLimits,
    positions: FxHashMap<String, Position>,
    equity: Option<f64>,
    peak_equity: f64,
    day_open_equity: Option<f64>,
    last_daily_reset: Option<NaiveDate>,
}

/// Counter snapshot for the risk engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskStats {
    /// Orders checked by `admit`
    pub checked: u64,
    /// Orders rejected
    pub rejected: u64,
}

/// Stateful, thread-safe pre-trade risk gate
pub struct RiskEngine {
    book: Mutex<RiskBook>,
    enabled: AtomicBool,
    checked: AtomicU64,
    rejected: AtomicU64,
}

impl RiskEngine {
    /// Build an enabled engine with the given limits
    #[must_use]
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            book: Mutex::new(RiskBook {
                limits,
                positions: FxHashMap::default(),
                equity: None,
                peak_equity: 0.0,
                day_open_equity: None,
                last_daily_reset: None,
            }),
            enabled: AtomicBool::new(true),
            checked: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Admit or reject an order against the current book
    ///
    /// Checks run in a fixed order and the first failure is the reason.
    /// Checks that need equity are skipped until the first equity tick.
    pub fn admit(&self, order: &Order, reference_price: f64) -> Result<(), RejectReason> {
        self.checked.fetch_add(1, Ordering::Relaxed);
        if !self.enabled.load(Ordering::Acquire) {
            return Ok(());
        }
        let book = self.book.lock();
        let result = Self::check(&book, order, reference_price);
        if let Err(reason) = result {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(symbol = %order.symbol, side = %order.side, volume = order.volume, %reason, "order rejected");
        }
        result
    }

    fn check(book: &RiskBook, order: &Order, reference_price: f64) -> Result<(), RejectReason> {
        let limits = &book.limits;
        let notional = (order.volume * reference_price).abs();

        // 1. Order notional
        if notional > limits.max_order_notional {
            return Err(RejectReason::OrderNotional);
        }

        // 2. Per-symbol volume cap
        if let Some(cap) = limits.symbol_limits.get(&order.symbol) {
            if order.volume > *cap {
                return Err(RejectReason::SymbolVolumeCap);
            }
        }

        // 3. Projected position notional after the fill
        let current = book
            .positions
            .get(&order.symbol)
            .map_or(0.0, |p| p.volume);
        let projected = current + order.side.sign() * order.volume;
        if (projected * reference_price).abs() > limits.max_position_notional {
            return Err(RejectReason::PositionNotional);
        }

        // 4. Projected gross exposure over equity
        if let Some(equity) = book.equity {
            if equity > 0.0 {
                let gross: f64 = book
                    .positions
                    .values()
                    .map(|p| p.notional(p.average_price))
                    .sum::<f64>()
                    + notional;
                if gross / equity > limits.max_leverage {
                    return Err(RejectReason::Leverage);
                }
            }
        }

        // 5. Drawdown from peak equity
        if let Some(equity) = book.equity {
            if book.peak_equity > 0.0 {
                let drawdown = (book.peak_equity - equity) / book.peak_equity;
                if drawdown > limits.max_drawdown {
                    return Err(RejectReason::Drawdown);
                }
            }
        }

        // 6. Day loss
        if let (Some(equity), Some(day_open)) = (book.equity, book.day_open_equity) {
            if day_open - equity > limits.max_daily_loss {
                return Err(RejectReason::DailyLoss);
            }
        }

        Ok(())
    }

    /// Fold a fill into the position mirror
    pub fn on_fill(&self, trade: &TradeUpdate) {
        let mut book = self.book.lock();
        let position = book
            .positions
            .entry(trade.symbol.clone())
            .or_insert_with(|| Position::new(trade.symbol.clone()));
        position.apply_fill(trade.side, trade.volume, trade.price);
        position.mark(trade.price);
        debug!(symbol = %trade.symbol, volume = position.volume, avg = position.average_price, "position updated");
    }

    /// Mark-to-market equity update; maintains the peak and seeds the
    /// daily baseline on the first tick
    pub fn on_equity_tick(&self, equity: f64) {
        let mut book = self.book.lock();
        book.equity = Some(equity);
        if equity > book.peak_equity {
            book.peak_equity = equity;
        }
        if book.day_open_equity.is_none() {
            book.day_open_equity = Some(equity);
        }
    }

    /// Snapshot the daily equity baseline; applies at most once per
    /// calendar day. Returns whether the reset was applied.
    pub fn reset_daily(&self) -> bool {
        let today = Utc::now().date_naive();
        let mut book = self.book.lock();
        if book.last_daily_reset == Some(today) {
            debug!("daily reset already applied for {today}");
            return false;
        }
        book.last_daily_reset = Some(today);
        book.day_open_equity = book.equity;
        info!(day_open = ?book.day_open_equity, "daily risk baseline reset");
        true
    }

    /// Replace the limits
    pub fn set_limits(&self, limits: RiskLimits) {
        self.book.lock().limits = limits;
        info!("risk limits updated");
    }

    /// Current limits
    #[must_use]
    pub fn limits(&self) -> RiskLimits {
        self.book.lock().limits.clone()
    }

    /// Re-enable admission checks
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
        info!("risk engine enabled");
    }

    /// Disable admission checks; `admit` returns Ok while tracking continues
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        warn!("risk engine disabled");
    }

    /// Whether admission checks run
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Position snapshot for one symbol
    #[must_use]
    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.book.lock().positions.get(symbol).cloned()
    }

    /// Snapshot of all positions
    #[must_use]
    pub fn positions(&self) -> Vec<Position> {
        self.book.lock().positions.values().cloned().collect()
    }

    /// Last known equity
    #[must_use]
    pub fn equity(&self) -> Option<f64> {
        self.book.lock().equity
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> RiskStats {
        RiskStats {
            checked: self.checked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
