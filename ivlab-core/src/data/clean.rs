//! Price cleaning and the validation gate.
//!
//! Cleaning is two steps, in order:
//! 1. Forward-fill each ticker along the date axis. Never back-fill, never
//!    interpolate, never drop rows here.
//! 2. Keep only dates where every ticker has a value, sort ascending, and
//!    drop repeated dates (first occurrence wins).
//!
//! Validation is a separate gate that fails the pipeline instead of
//! correcting data. Every check runs so the caller sees all violations.

use super::frame::PriceSeries;
use std::fmt;
use thiserror::Error;

/// Minimum trading days a cleaned table must have by default.
pub const DEFAULT_MIN_ROWS: usize = 500;

/// Carry the last valid observation forward, per ticker.
///
/// Filling walks rows in chronological order (stable for repeated dates),
/// whatever order they are stored in. Row order and count are unchanged.
/// A leading run of missing values has nothing to carry and stays missing.
pub fn forward_fill(raw: &PriceSeries) -> PriceSeries {
    let dates = raw.dates();
    let mut order: Vec<usize> = (0..raw.n_rows()).collect();
    order.sort_by_key(|&i| dates[i]);

    let values = raw
        .iter_columns()
        .map(|(_, column)| {
            let mut filled = column.to_vec();
            let mut last = f64::NAN;
            for &i in &order {
                if column[i].is_nan() {
                    filled[i] = last;
                } else {
                    last = column[i];
                }
            }
            filled
        })
        .collect();
    raw.with_same_columns(dates.to_vec(), values)
}

/// Strict inner join on the date axis.
///
/// Keeps rows where every ticker has a value, sorts by date (stable), and
/// removes repeated dates keeping the first.
pub fn align_to_common_dates(filled: &PriceSeries) -> PriceSeries {
    let mut rows: Vec<usize> = (0..filled.n_rows())
        .filter(|&i| filled.row_is_complete(i))
        .collect();

    let dates = filled.dates();
    rows.sort_by_key(|&i| dates[i]);
    rows.dedup_by_key(|i| dates[*i]);

    filled.take_rows(&rows)
}

/// Forward-fill then align.
pub fn clean(raw: &PriceSeries) -> PriceSeries {
    tracing::debug!(rows = raw.n_rows(), cols = raw.n_cols(), "raw price table");
    let cleaned = align_to_common_dates(&forward_fill(raw));
    tracing::info!(
        rows = cleaned.n_rows(),
        cols = cleaned.n_cols(),
        dropped = raw.n_rows() - cleaned.n_rows(),
        "cleaned price table"
    );
    cleaned
}

/// Thresholds for the validation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationRules {
    /// Minimum number of rows.
    pub min_rows: usize,
    /// Number of distinct tickers the caller asked for.
    pub requested_tickers: usize,
}

impl ValidationRules {
    pub fn new(min_rows: usize, requested_tickers: usize) -> Self {
        Self {
            min_rows,
            requested_tickers,
        }
    }
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_ROWS, 1)
    }
}

/// A single failed validation check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("{rows} trading days, need at least {min_rows}")]
    InsufficientRows { rows: usize, min_rows: usize },

    #[error("{assets} asset column(s) for a {requested}-ticker request, need at least 2")]
    InsufficientAssets { assets: usize, requested: usize },

    #[error("{count} missing value(s)")]
    MissingValues { count: usize },

    #[error("{count} non-positive price(s)")]
    NonPositivePrices { count: usize },
}

/// Every check that failed on a cleaned table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct DataValidationError {
    pub violations: Vec<Violation>,
}

impl fmt::Display for DataValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data failed validation: ")?;
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

/// Run every check and report all failures together.
pub fn validate(data: &PriceSeries, rules: &ValidationRules) -> Result<(), DataValidationError> {
    let mut violations = Vec::new();

    let rows = data.n_rows();
    if rows < rules.min_rows {
        violations.push(Violation::InsufficientRows {
            rows,
            min_rows: rules.min_rows,
        });
    }

    let assets = data.n_cols();
    if rules.requested_tickers > 1 && assets < 2 {
        violations.push(Violation::InsufficientAssets {
            assets,
            requested: rules.requested_tickers,
        });
    }

    let missing = data.missing_count();
    if missing > 0 {
        violations.push(Violation::MissingValues { count: missing });
    }

    let non_positive: usize = data
        .iter_columns()
        .map(|(_, col)| col.iter().filter(|&&v| v <= 0.0).count())
        .sum();
    if non_positive > 0 {
        violations.push(Violation::NonPositivePrices {
            count: non_positive,
        });
    }

    tracing::info!(rows, assets, missing, non_positive, passed = violations.is_empty(), "validation gate");

    if violations.is_empty() {
        Ok(())
    } else {
        Err(DataValidationError { violations })
    }
}
