//! CPU reference backend

use crate::backend::{NumericsBackend, NumericsError, OptionQuote, SimulationParams};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Deterministic CPU implementation of the numerics contract
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl CpuBackend {
    /// Construct the backend
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn window_mean(window: &[f64]) -> f64 {
    window.iter().sum::<f64>() / window.len() as f64
}

fn window_stdev(window: &[f64]) -> f64 {
    let mean = window_mean(window);
    let var = window.iter().map(|p| (p - mean) * (p - mean)).sum::<f64>() / window.len() as f64;
    var.sqrt()
}

/// Abramowitz-Stegun 7.1.26 polynomial approximation of erf
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

impl NumericsBackend for CpuBackend {
    fn moving_average(&self, prices: &[f64], period: usize) -> Result<Vec<f64>, NumericsError> {
        if period == 0 {
            return Err(NumericsError::InvalidInput("period must be positive".into()));
        }
        if prices.len() < period {
            return Err(NumericsError::InvalidInput(format!(
                "need at least {period} prices, got {}",
                prices.len()
            )));
        }
        Ok(prices.windows(period).map(window_mean).collect())
    }

    fn ema(&self, prices: &[f64], alpha: f64) -> Result<Vec<f64>, NumericsError> {
        if prices.is_empty() {
            return Err(NumericsError::InvalidInput("empty price series".into()));
        }
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(NumericsError::InvalidInput(format!(
                "alpha must be in (0, 1], got {alpha}"
            )));
        }
        let mut out = Vec::with_capacity(prices.len());
        let mut prev = prices[0];
        out.push(prev);
        for &price in &prices[1..] {
            prev = alpha * price + (1.0 - alpha) * prev;
            out.push(prev);
        }
        Ok(out)
    }

    fn bollinger(
        &self,
        prices: &[f64],
        period: usize,
        k: f64,
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), NumericsError> {
        if period == 0 {
            return Err(NumericsError::InvalidInput("period must be positive".into()));
        }
        if prices.len() < period {
            return Err(NumericsError::InvalidInput(format!(
                "need at least {period} prices, got {}",
                prices.len()
            )));
        }
        let mut upper = Vec::with_capacity(prices.len() - period + 1);
        let mut middle = Vec::with_capacity(prices.len() - period + 1);
        let mut lower = Vec::with_capacity(prices.len() - period + 1);
        for window in prices.windows(period) {
            let mean = window_mean(window);
            let dev = k * window_stdev(window);
            upper.push(mean + dev);
            middle.push(mean);
            lower.push(mean - dev);
        }
        Ok((upper, middle, lower))
    }

    fn rsi(&self, prices: &[f64], period: usize) -> Result<Vec<f64>, NumericsError> {
        if period == 0 {
            return Err(NumericsError::InvalidInput("period must be positive".into()));
        }
        if prices.len() < period + 1 {
            return Err(NumericsError::InvalidInput(format!(
                "need at least {} prices, got {}",
                period + 1,
                prices.len()
            )));
        }
        let diffs: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
        let mut out = Vec::with_capacity(diffs.len() - period + 1);
        for window in diffs.windows(period) {
            let gains: f64 = window.iter().filter(|d| **d > 0.0).sum();
            let losses: f64 = -window.iter().filter(|d| **d < 0.0).sum::<f64>();
            if losses == 0.0 {
                out.push(100.0);
            } else {
                let rs = gains / losses;
                out.push(100.0 - 100.0 / (1.0 + rs));
            }
        }
        Ok(out)
    }

    fn black_scholes(
        &self,
        options: &[OptionQuote],
    ) -> Result<(Vec<f64>, Vec<f64>), NumericsError> {
        let mut calls = Vec::with_capacity(options.len());
        let mut puts = Vec::with_capacity(options.len());
        for opt in options {
            if opt.spot <= 0.0 || opt.strike <= 0.0 {
                return Err(NumericsError::InvalidInput(
                    "spot and strike must be positive".into(),
                ));
            }
            if opt.time_to_expiry <= 0.0 || opt.volatility <= 0.0 {
                // Expired or deterministic underlying: discounted intrinsic value
                let disc_strike = opt.strike * (-opt.rate * opt.time_to_expiry.max(0.0)).exp();
                calls.push((opt.spot - disc_strike).max(0.0));
                puts.push((disc_strike - opt.spot).max(0.0));
                continue;
            }
            let sqrt_t = opt.time_to_expiry.sqrt();
            let d1 = ((opt.spot / opt.strike).ln()
                + (opt.rate + 0.5 * opt.volatility * opt.volatility) * opt.time_to_expiry)
                / (opt.volatility * sqrt_t);
            let d2 = d1 - opt.volatility * sqrt_t;
            let disc_strike = opt.strike * (-opt.rate * opt.time_to_expiry).exp();
            calls.push(opt.spot * norm_cdf(d1) - disc_strike * norm_cdf(d2));
            puts.push(disc_strike * norm_cdf(-d2) - opt.spot * norm_cdf(-d1));
        }
        Ok((calls, puts))
    }

    fn monte_carlo(
        &self,
        params: &SimulationParams,
        paths: usize,
        steps: usize,
    ) -> Result<Vec<Vec<f64>>, NumericsError> {
        if paths == 0 || steps == 0 {
            return Err(NumericsError::InvalidInput(
                "paths and steps must be positive".into(),
            ));
        }
        if params.spot <= 0.0 || params.horizon <= 0.0 || params.volatility < 0.0 {
            return Err(NumericsError::InvalidInput(
                "spot and horizon must be positive, volatility non-negative".into(),
            ));
        }
        let mut rng = StdRng::seed_from_u64(params.seed);
        let dt = params.horizon / steps as f64;
        let drift_term = (params.drift - 0.5 * params.volatility * params.volatility) * dt;
        let vol_term = params.volatility * dt.sqrt();
        let mut out = Vec::with_capacity(paths);
        for _ in 0..paths {
            let mut path = Vec::with_capacity(steps);
            let mut price = params.spot;
            for _ in 0..steps {
                // Box-Muller from two uniforms keeps the dependency set small
                let u1: f64 = 1.0 - rng.gen::<f64>();
                let u2: f64 = rng.gen::<f64>();
                let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                price *= (drift_term + vol_term * z).exp();
                path.push(price);
            }
            out.push(path);
        }
        Ok(out)
    }

    fn portfolio_optimize(
        &self,
        returns: &[f64],
        covariance: &[Vec<f64>],
        risk_free: f64,
        target_return: f64,
    ) -> Result<Vec<f64>, NumericsError> {
        let n = returns.len();
        if n == 0 {
            return Err(NumericsError::InvalidInput("no assets".into()));
        }
        if covariance.len() != n || covariance.iter().any(|row| row.len() != n) {
            return Err(NumericsError::InvalidInput(format!(
                "covariance must be {n}x{n}"
            )));
        }
        // Excess return over own variance, floored at zero
        let mut weights: Vec<f64> = (0..n)
            .map(|i| {
                let var = covariance[i][i];
                if var > 0.0 {
                    ((returns[i] - risk_free) / var).max(0.0)
                } else {
                    0.0
                }
            })
            .collect();
        let sum: f64 = weights.iter().sum();
        if sum <= 0.0 {
            weights = vec![1.0 / n as f64; n];
        } else {
            for w in &mut weights {
                *w /= sum;
            }
        }
        // Blend toward the highest-return asset until the target is met
        let port_return: f64 = weights.iter().zip(returns).map(|(w, r)| w * r).sum();
        if port_return < target_return {
            let (best, best_return) = returns
                .iter()
                .copied()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |acc, (i, r)| {
                    if r > acc.1 {
                        (i, r)
                    } else {
                        acc
                    }
                });
            if best_return > port_return {
                let lambda =
                    ((target_return - port_return) / (best_return - port_return)).clamp(0.0, 1.0);
                for (i, w) in weights.iter_mut().enumerate() {
                    *w *= 1.0 - lambda;
                    if i == best {
                        *w += lambda;
                    }
                }
            }
        }
        Ok(weights)
    }

    fn value_at_risk(
        &self,
        returns: &[Vec<f64>],
        weights: &[f64],
        confidence: f64,
        horizon: u32,
    ) -> Result<f64, NumericsError> {
        if returns.is_empty() || returns.len() != weights.len() {
            return Err(NumericsError::InvalidInput(
                "weights and return series must align".into(),
            ));
        }
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(NumericsError::InvalidInput(format!(
                "confidence must be in (0, 1), got {confidence}"
            )));
        }
        let periods = returns[0].len();
        if periods == 0 || returns.iter().any(|series| series.len() != periods) {
            return Err(NumericsError::InvalidInput(
                "return series must be non-empty and equal length".into(),
            ));
        }
        let mut portfolio: Vec<f64> = (0..periods)
            .map(|t| {
                returns
                    .iter()
                    .zip(weights)
                    .map(|(series, w)| series[t] * w)
                    .sum()
            })
            .collect();
        portfolio.sort_by(|a, b| a.partial_cmp(b).expect("finite returns"));
        let idx = (((1.0 - confidence) * periods as f64).floor() as usize).min(periods - 1);
        let var = -portfolio[idx] * f64::from(horizon).sqrt();
        Ok(var.max(0.0))
    }
}
