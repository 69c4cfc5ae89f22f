//! Black-Scholes pricing and implied-volatility inversion.
//!
//! Inversion runs Newton steps on the pricing function inside a shrinking
//! bisection bracket. A Newton step that leaves the bracket, or a vanishing
//! vega, falls back to bisection, so the iteration always converges for
//! prices inside the no-arbitrage bounds.

use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;
use std::f64::consts::{PI, SQRT_2};
use thiserror::Error;

/// Lower edge of the volatility search bracket.
pub const MIN_VOL: f64 = 1e-6;
/// Upper edge of the volatility search bracket (500% annualized).
pub const MAX_VOL: f64 = 5.0;

const PRICE_TOLERANCE: f64 = 1e-8;
/// Largest remaining Newton step (or bracket width) accepted as converged.
const VOL_TOLERANCE: f64 = 1e-10;
const MAX_ITERATIONS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionKind {
    Call,
    Put,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InversionError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("price {price} is outside no-arbitrage bounds ({lower}, {upper})")]
    OutOfBounds { price: f64, lower: f64, upper: f64 },

    #[error("price {price} implies a volatility outside the search bracket")]
    OutsideBracket { price: f64 },

    #[error("no convergence after {iterations} iterations")]
    NoConvergence { iterations: u32 },
}

/// Standard normal CDF.
fn norm_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Standard normal PDF.
fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

/// European option pricer at a fixed continuously-compounded rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlackScholes {
    pub rate: f64,
}

impl BlackScholes {
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }

    fn d1(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        ((spot / strike).ln() + (self.rate + 0.5 * vol * vol) * time) / (vol * time.sqrt())
    }

    /// Theoretical price. At `time <= 0` this is intrinsic value.
    pub fn price(&self, spot: f64, strike: f64, time: f64, vol: f64, kind: OptionKind) -> f64 {
        if time <= 0.0 {
            return match kind {
                OptionKind::Call => (spot - strike).max(0.0),
                OptionKind::Put => (strike - spot).max(0.0),
            };
        }
        let d1 = self.d1(spot, strike, time, vol);
        let d2 = d1 - vol * time.sqrt();
        let discounted_strike = strike * (-self.rate * time).exp();
        match kind {
            OptionKind::Call => spot * norm_cdf(d1) - discounted_strike * norm_cdf(d2),
            OptionKind::Put => discounted_strike * norm_cdf(-d2) - spot * norm_cdf(-d1),
        }
    }

    /// Sensitivity of price to volatility (per unit of vol, not per 1%).
    pub fn vega(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        if time <= 0.0 {
            return 0.0;
        }
        spot * norm_pdf(self.d1(spot, strike, time, vol)) * time.sqrt()
    }

    /// Open interval a market price must fall in for a positive, finite vol.
    pub fn price_bounds(&self, spot: f64, strike: f64, time: f64, kind: OptionKind) -> (f64, f64) {
        let discounted_strike = strike * (-self.rate * time).exp();
        match kind {
            OptionKind::Call => ((spot - discounted_strike).max(0.0), spot),
            OptionKind::Put => ((discounted_strike - spot).max(0.0), discounted_strike),
        }
    }

    /// Volatility at which the model price equals `price`.
    pub fn implied_vol(
        &self,
        price: f64,
        spot: f64,
        strike: f64,
        time: f64,
        kind: OptionKind,
    ) -> Result<f64, InversionError> {
        for (name, v) in [("price", price), ("spot", spot), ("strike", strike), ("time", time)] {
            if !v.is_finite() || v <= 0.0 {
                return Err(InversionError::InvalidInput(format!(
                    "{name} must be positive and finite, got {v}"
                )));
            }
        }
        if !self.rate.is_finite() {
            return Err(InversionError::InvalidInput("rate must be finite".into()));
        }

        let (lower, upper) = self.price_bounds(spot, strike, time, kind);
        if price <= lower || price >= upper {
            return Err(InversionError::OutOfBounds {
                price,
                lower,
                upper,
            });
        }

        let objective = |vol: f64| self.price(spot, strike, time, vol, kind) - price;

        let mut lo = MIN_VOL;
        let mut hi = MAX_VOL;
        if objective(lo) > 0.0 || objective(hi) < 0.0 {
            return Err(InversionError::OutsideBracket { price });
        }

        // Brenner-Subrahmanyam starting point
        let mut vol = ((price / spot) * (2.0 * PI / time).sqrt()).clamp(lo, hi);

        let mut diff = f64::INFINITY;
        for _ in 0..MAX_ITERATIONS {
            diff = objective(vol);
            let vega = self.vega(spot, strike, time, vol);
            let step = if vega > 1e-12 { diff / vega } else { f64::INFINITY };
            // A small price error alone does not pin vol when vega is small.
            if diff == 0.0 || (diff.abs() < PRICE_TOLERANCE && step.abs() < VOL_TOLERANCE) {
                return Ok(vol);
            }
            // Price is increasing in vol, so the sign of diff moves one edge.
            if diff > 0.0 {
                hi = vol;
            } else {
                lo = vol;
            }
            if hi - lo < VOL_TOLERANCE {
                return Ok(0.5 * (lo + hi));
            }

            let newton = vol - step;
            vol = if newton > lo && newton < hi {
                newton
            } else {
                0.5 * (lo + hi)
            };
        }

        // Price-level agreement when rounding keeps the step from shrinking
        if diff.abs() < PRICE_TOLERANCE {
            return Ok(vol);
        }
        Err(InversionError::NoConvergence {
            iterations: MAX_ITERATIONS,
        })
    }
}

/// Implied volatility for `(price, spot, strike, time, rate, kind)`.
pub fn implied_volatility(
    price: f64,
    spot: f64,
    strike: f64,
    time: f64,
    rate: f64,
    kind: OptionKind,
) -> Result<f64, InversionError> {
    BlackScholes::new(rate).implied_vol(price, spot, strike, time, kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textbook_prices() {
        let bs = BlackScholes::new(0.05);
        let call = bs.price(100.0, 100.0, 1.0, 0.2, OptionKind::Call);
        let put = bs.price(100.0, 100.0, 1.0, 0.2, OptionKind::Put);
        assert!((call - 10.4506).abs() < 1e-3, "call = {call}");
        assert!((put - 5.5735).abs() < 1e-3, "put = {put}");
    }

    #[test]
    fn put_call_parity() {
        let bs = BlackScholes::new(0.03);
        let (s, k, t, v) = (105.0, 100.0, 0.5, 0.3);
        let lhs = bs.price(s, k, t, v, OptionKind::Call) - bs.price(s, k, t, v, OptionKind::Put);
        let rhs = s - k * (-0.03f64 * t).exp();
        assert!((lhs - rhs).abs() < 1e-10);
    }

    #[test]
    fn inversion_recovers_vol() {
        let bs = BlackScholes::new(0.045);
        for &(s, k, t, v) in &[
            (100.0, 100.0, 30.0 / 365.0, 0.25),
            (100.0, 120.0, 0.5, 0.45),
            (250.0, 200.0, 0.1, 0.15),
            (50.0, 50.0, 2.0, 1.2),
        ] {
            let price = bs.price(s, k, t, v, OptionKind::Call);
            let iv = bs.implied_vol(price, s, k, t, OptionKind::Call).unwrap();
            assert!((iv - v).abs() < 1e-6, "expected {v}, got {iv}");
        }
    }

    #[test]
    fn low_vega_inversion_pins_vol_not_just_price() {
        // Deep ITM and short-dated: vega is tiny, so a 1e-8 price error
        // would leave vol off in the sixth decimal.
        let bs = BlackScholes::new(0.045);
        let (s, k, t) = (250.0, 200.0, 0.1);
        let vega = bs.vega(s, k, t, 0.15);
        assert!(vega < 1e-2, "vega = {vega}");

        let price = bs.price(s, k, t, 0.15, OptionKind::Call);
        let iv = bs.implied_vol(price, s, k, t, OptionKind::Call).unwrap();
        assert!((iv - 0.15).abs() < 1e-8, "got {iv}");
    }

    #[test]
    fn inversion_handles_puts() {
        let price = BlackScholes::new(0.02).price(100.0, 110.0, 0.25, 0.35, OptionKind::Put);
        let iv = implied_volatility(price, 100.0, 110.0, 0.25, 0.02, OptionKind::Put).unwrap();
        assert!((iv - 0.35).abs() < 1e-6);
    }

    #[test]
    fn rejects_arbitrage_violations() {
        let bs = BlackScholes::new(0.045);
        // A call can never be worth more than the underlying.
        assert!(matches!(
            bs.implied_vol(101.0, 100.0, 100.0, 0.5, OptionKind::Call),
            Err(InversionError::OutOfBounds { .. })
        ));
        // Deep ITM call priced below intrinsic.
        assert!(matches!(
            bs.implied_vol(10.0, 150.0, 100.0, 0.5, OptionKind::Call),
            Err(InversionError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn rejects_non_positive_inputs() {
        assert!(matches!(
            implied_volatility(1.0, 100.0, 100.0, 0.0, 0.045, OptionKind::Call),
            Err(InversionError::InvalidInput(_))
        ));
    }
}
