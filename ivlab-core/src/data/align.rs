//! Multi-ticker time assembly.
//!
//! Given per-ticker close series, lay them onto the union of all their dates.
//! A ticker with no observation on a date gets `NaN` there. No filling happens
//! here; that is the cleaner's job.

use super::frame::{FrameError, PriceSeries};
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

/// One daily close observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyClose {
    pub date: NaiveDate,
    pub close: f64,
}

/// Assemble per-ticker series into a raw price table.
///
/// Columns follow the order of `tickers`. A ticker missing from `series`
/// becomes an all-`NaN` column. When a ticker reports the same date twice,
/// the first observation wins.
pub fn union_align(
    tickers: &[String],
    series: &HashMap<String, Vec<DailyClose>>,
) -> Result<PriceSeries, FrameError> {
    // Collect the union of all dates
    let mut all_dates = BTreeSet::new();
    for closes in series.values() {
        for obs in closes {
            all_dates.insert(obs.date);
        }
    }
    let dates: Vec<NaiveDate> = all_dates.into_iter().collect();

    let mut columns = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        let mut by_date: HashMap<NaiveDate, f64> = HashMap::new();
        if let Some(closes) = series.get(ticker) {
            for obs in closes {
                by_date.entry(obs.date).or_insert(obs.close);
            }
        }

        let column: Vec<f64> = dates
            .iter()
            .map(|date| by_date.get(date).copied().unwrap_or(f64::NAN))
            .collect();
        columns.push((ticker.clone(), column));
    }

    PriceSeries::from_columns(dates, columns)
}
