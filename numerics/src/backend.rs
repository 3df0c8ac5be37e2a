//! Backend trait and input types

use thiserror::Error;

/// Numerics failure; fatal to the calling strategy's current tick only
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NumericsError {
    /// The backend cannot serve requests right now
    #[error("numerics backend unavailable")]
    Unavailable,
    /// Inputs violate the operation's preconditions
    #[error("invalid numerics input: {0}")]
    InvalidInput(String),
}

/// One European option to price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionQuote {
    /// Spot price of the underlying
    pub spot: f64,
    /// Strike price
    pub strike: f64,
    /// Continuously compounded risk-free rate
    pub rate: f64,
    /// Annualized volatility
    pub volatility: f64,
    /// Time to expiry in years
    pub time_to_expiry: f64,
}

/// Parameters for a geometric Brownian motion simulation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationParams {
    /// Starting price
    pub spot: f64,
    /// Annualized drift
    pub drift: f64,
    /// Annualized volatility
    pub volatility: f64,
    /// Simulated horizon in years
    pub horizon: f64,
    /// RNG seed; identical seeds produce identical paths
    pub seed: u64,
}

/// Indicator and pricing operations available to strategies
///
/// Every operation is pure: identical inputs produce identical outputs.
pub trait NumericsBackend: Send + Sync {
    /// Simple moving average; output has `prices.len() - period + 1` points
    fn moving_average(&self, prices: &[f64], period: usize) -> Result<Vec<f64>, NumericsError>;

    /// Exponential moving average with smoothing factor `alpha` in (0, 1]
    fn ema(&self, prices: &[f64], alpha: f64) -> Result<Vec<f64>, NumericsError>;

    /// Bollinger bands: (upper, middle, lower), `k` standard deviations
    #[allow(clippy::type_complexity)]
    fn bollinger(
        &self,
        prices: &[f64],
        period: usize,
        k: f64,
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), NumericsError>;

    /// Relative strength index over `period`; output has
    /// `prices.len() - period` points
    fn rsi(&self, prices: &[f64], period: usize) -> Result<Vec<f64>, NumericsError>;

    /// Black-Scholes prices: (calls, puts), one pair per input option
    fn black_scholes(
        &self,
        options: &[OptionQuote],
    ) -> Result<(Vec<f64>, Vec<f64>), NumericsError>;

    /// Simulated price paths, `paths` rows of `steps` points each
    fn monte_carlo(
        &self,
        params: &SimulationParams,
        paths: usize,
        steps: usize,
    ) -> Result<Vec<Vec<f64>>, NumericsError>;

    /// Portfolio weights for the given expected returns and covariance
    fn portfolio_optimize(
        &self,
        returns: &[f64],
        covariance: &[Vec<f64>],
        risk_free: f64,
        target_return: f64,
    ) -> Result<Vec<f64>, NumericsError>;

    /// Value at risk of the weighted portfolio at `confidence` over
    /// `horizon` periods, returned as a positive number
    fn value_at_risk(
        &self,
        returns: &[Vec<f64>],
        weights: &[f64],
        confidence: f64,
        horizon: u32,
    ) -> Result<f64, NumericsError>;
}
