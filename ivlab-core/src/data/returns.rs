//! Log returns and annualization.
//!
//! Log returns are additive across time: the n-day log return equals the
//! sum of the n daily log returns. Volatility scales with the square root of
//! time under the i.i.d. assumption; mean returns scale linearly.

use super::frame::{LabeledMatrix, PriceSeries, ReturnSeries};

/// Trading days per year.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// `ln(p_t / p_{t-1})` per column, with the undefined first row dropped.
///
/// Output has one fewer row than the input. A table with fewer than two
/// rows produces an empty table with the same columns.
pub fn log_returns(prices: &PriceSeries) -> ReturnSeries {
    if prices.n_rows() < 2 {
        return prices.with_same_columns(Vec::new(), vec![Vec::new(); prices.n_cols()]);
    }

    let dates = prices.dates()[1..].to_vec();
    let values = prices
        .iter_columns()
        .map(|(_, col)| col.windows(2).map(|w| (w[1] / w[0]).ln()).collect())
        .collect();
    prices.with_same_columns(dates, values)
}

/// Scale a daily volatility to an annual one (× √252).
pub fn annualize_vol(daily_vol: f64) -> f64 {
    daily_vol * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Scale a daily mean log return to an annual one (× 252).
pub fn annualize_return(daily_return: f64) -> f64 {
    daily_return * TRADING_DAYS_PER_YEAR
}

/// Mean of the non-missing values; `NaN` if there are none.
pub fn nan_mean(values: &[f64]) -> f64 {
    let (sum, n) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Sample standard deviation (n − 1) of the non-missing values.
///
/// `NaN` with fewer than two observations.
pub fn nan_std(values: &[f64]) -> f64 {
    let observed: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if observed.len() < 2 {
        return f64::NAN;
    }
    let mean = observed.iter().sum::<f64>() / observed.len() as f64;
    let ss: f64 = observed.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (observed.len() - 1) as f64).sqrt()
}

/// Full-sample annualized volatility per column.
pub fn column_volatility(returns: &ReturnSeries) -> Vec<(String, f64)> {
    returns
        .iter_columns()
        .map(|(name, col)| (name.to_string(), annualize_vol(nan_std(col))))
        .collect()
}

/// Rolling annualized realised volatility over `window` rows.
///
/// Row `i` uses rows `i + 1 - window ..= i`. The first `window - 1` rows, and
/// any window containing a missing value, are `NaN`. A window below 2 has no
/// sample std, so every row is `NaN`.
pub fn realized_vol(returns: &ReturnSeries, window: usize) -> LabeledMatrix {
    let values = returns
        .iter_columns()
        .map(|(_, col)| {
            (0..col.len())
                .map(|i| {
                    if window < 2 || i + 1 < window {
                        return f64::NAN;
                    }
                    let slice = &col[i + 1 - window..=i];
                    if slice.iter().any(|v| v.is_nan()) {
                        f64::NAN
                    } else {
                        annualize_vol(nan_std(slice))
                    }
                })
                .collect()
        })
        .collect();
    returns.with_same_columns(returns.dates().to_vec(), values)
}

/// Implied vol relative to predicted historical vol (IVR).
///
/// `None` unless both inputs are finite and `hv` is positive.
pub fn iv_hv_ratio(iv: f64, hv: f64) -> Option<f64> {
    (iv.is_finite() && hv.is_finite() && hv > 0.0).then(|| iv / hv)
}
