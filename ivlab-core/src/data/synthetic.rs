//! Seeded geometric random-walk price provider.
//!
//! Each ticker draws from its own RNG stream derived from the hierarchy's
//! master seed, so a ticker's path is identical no matter which other tickers
//! are requested alongside it. Sessions are weekdays in `[start, end]`.

use super::frame::PriceSeries;
use super::provider::{DataError, DataSource, PriceProvider};
use super::returns::TRADING_DAYS_PER_YEAR;
use crate::rng::RngHierarchy;
use chrono::{Datelike, Days, NaiveDate, Weekday};
use rand::Rng;
use serde::{Deserialize, Serialize};

const STREAM: &str = "synthetic_prices";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WalkParams {
    pub initial_price: f64,
    /// Annualized drift of the log price.
    pub annual_drift: f64,
    /// Annualized volatility of log returns.
    pub annual_vol: f64,
    /// Probability that a session is reported missing for a ticker.
    pub missing_prob: f64,
}

impl Default for WalkParams {
    fn default() -> Self {
        Self {
            initial_price: 100.0,
            annual_drift: 0.07,
            annual_vol: 0.20,
            missing_prob: 0.0,
        }
    }
}

pub struct SyntheticProvider {
    rng: RngHierarchy,
    params: WalkParams,
}

impl SyntheticProvider {
    pub fn new(rng: RngHierarchy, params: WalkParams) -> Self {
        Self { rng, params }
    }

    pub fn params(&self) -> &WalkParams {
        &self.params
    }
}

/// Weekdays in `[start, end]`.
pub fn weekdays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    let mut day = start;
    while day <= end {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(day);
        }
        match day.checked_add_days(Days::new(1)) {
            Some(next) => day = next,
            None => break,
        }
    }
    out
}

/// Standard normal draw via Box-Muller.
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    // 1 - u keeps the log argument in (0, 1]
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

impl PriceProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn source(&self) -> DataSource {
        DataSource::Synthetic
    }

    fn fetch_prices(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, DataError> {
        let p = self.params;
        if !(p.initial_price > 0.0 && p.annual_vol >= 0.0 && (0.0..1.0).contains(&p.missing_prob)) {
            return Err(DataError::Other(format!("invalid random-walk parameters: {p:?}")));
        }

        let dates = weekdays(start, end);
        let dt = 1.0 / TRADING_DAYS_PER_YEAR;
        let step_vol = p.annual_vol * dt.sqrt();
        let step_drift = (p.annual_drift - 0.5 * p.annual_vol * p.annual_vol) * dt;

        let mut columns = Vec::with_capacity(tickers.len());
        for ticker in tickers {
            let mut rng = self.rng.rng_for(STREAM, ticker);
            let mut price = p.initial_price;
            let column: Vec<f64> = dates
                .iter()
                .map(|_| {
                    let observed = price;
                    price *= (step_drift + step_vol * standard_normal(&mut rng)).exp();
                    if p.missing_prob > 0.0 && rng.gen::<f64>() < p.missing_prob {
                        f64::NAN
                    } else {
                        observed
                    }
                })
                .collect();
            columns.push((ticker.clone(), column));
        }

        tracing::debug!(
            seed = self.rng.master_seed(),
            tickers = tickers.len(),
            rows = dates.len(),
            "generated synthetic prices"
        );
        Ok(PriceSeries::from_columns(dates, columns)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn tickers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn weekdays_skip_weekends() {
        // Fri 2024-01-05 .. Tue 2024-01-09
        let days = weekdays(d("2024-01-05"), d("2024-01-09"));
        assert_eq!(days, [d("2024-01-05"), d("2024-01-08"), d("2024-01-09")]);
        assert!(weekdays(d("2024-01-09"), d("2024-01-05")).is_empty());
    }

    #[test]
    fn same_seed_same_path_regardless_of_companions() {
        let a = SyntheticProvider::new(RngHierarchy::new(42), WalkParams::default());
        let b = SyntheticProvider::new(RngHierarchy::new(42), WalkParams::default());

        let alone = a
            .fetch_prices(&tickers(&["SPY"]), d("2023-01-02"), d("2023-06-30"))
            .unwrap();
        let together = b
            .fetch_prices(&tickers(&["QQQ", "SPY"]), d("2023-01-02"), d("2023-06-30"))
            .unwrap();
        assert_eq!(alone.column("SPY"), together.column("SPY"));
        assert_ne!(together.column("SPY"), together.column("QQQ"));
    }

    #[test]
    fn prices_are_positive_and_start_at_initial() {
        let provider = SyntheticProvider::new(RngHierarchy::new(7), WalkParams::default());
        let prices = provider
            .fetch_prices(&tickers(&["AAA"]), d("2022-01-03"), d("2023-12-29"))
            .unwrap();
        let col = prices.column("AAA").unwrap();
        assert_eq!(col[0], 100.0);
        assert!(col.iter().all(|p| p.is_finite() && *p > 0.0));
        assert_eq!(prices.missing_count(), 0);
    }

    #[test]
    fn missing_probability_produces_gaps() {
        let params = WalkParams {
            missing_prob: 0.2,
            ..WalkParams::default()
        };
        let provider = SyntheticProvider::new(RngHierarchy::new(3), params);
        let prices = provider
            .fetch_prices(&tickers(&["X", "Y"]), d("2022-01-03"), d("2022-12-30"))
            .unwrap();
        assert!(prices.missing_count() > 0);
        assert!(prices.missing_count() < prices.n_rows() * prices.n_cols());
    }

    #[test]
    fn rejects_invalid_params() {
        let params = WalkParams {
            initial_price: 0.0,
            ..WalkParams::default()
        };
        let provider = SyntheticProvider::new(RngHierarchy::new(1), params);
        assert!(provider
            .fetch_prices(&tickers(&["X"]), d("2022-01-03"), d("2022-01-10"))
            .is_err());
    }
}
