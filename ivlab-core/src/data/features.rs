//! Feature construction, train-only standardization, and temporal splits.
//!
//! Scaling statistics are fit on the training partition and applied
//! unchanged to validation and test partitions. `ScalingStats` records the
//! last date it was fit on; the out-of-sample path refuses to apply it to any
//! row at or before that date.

use super::frame::{FrameError, LabeledMatrix, PriceSeries, ReturnSeries};
use super::returns::{log_returns, nan_mean, nan_std, realized_vol};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default rolling window for realised-volatility features.
pub const DEFAULT_FEATURE_WINDOW: usize = 30;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    #[error("scaling stats cover columns {expected:?}, table has {actual:?}")]
    ColumnMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error(
        "leakage: stats fit through {fitted_through} applied to a row dated {row_date}"
    )]
    Leakage {
        fitted_through: NaiveDate,
        row_date: NaiveDate,
    },

    #[error("train_end {train_end} is after val_end {val_end}")]
    InvalidBoundary {
        train_end: NaiveDate,
        val_end: NaiveDate,
    },

    #[error("rolling window must be at least 2 rows, got {0}")]
    InvalidWindow(usize),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Per-column mean and standard deviation used to standardize a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingStats {
    pub columns: Vec<String>,
    pub mean: Vec<f64>,
    /// Sample std per column; `NaN` for zero-variance columns.
    pub std: Vec<f64>,
    /// Last date of the data the stats were fit on.
    pub fitted_through: Option<NaiveDate>,
}

impl ScalingStats {
    /// Fit mean and sample std on `x`, skipping missing cells.
    pub fn fit(x: &LabeledMatrix) -> Self {
        let mut mean = Vec::with_capacity(x.n_cols());
        let mut std = Vec::with_capacity(x.n_cols());
        for (_, col) in x.iter_columns() {
            mean.push(nan_mean(col));
            let s = nan_std(col);
            std.push(if s == 0.0 { f64::NAN } else { s });
        }
        Self {
            columns: x.columns().to_vec(),
            mean,
            std,
            fitted_through: x.dates().iter().max().copied(),
        }
    }

    /// `(x - mean) / std` per column.
    pub fn transform(&self, x: &LabeledMatrix) -> Result<LabeledMatrix, FeatureError> {
        if x.columns() != self.columns.as_slice() {
            return Err(FeatureError::ColumnMismatch {
                expected: self.columns.clone(),
                actual: x.columns().to_vec(),
            });
        }
        let values = x
            .iter_columns()
            .enumerate()
            .map(|(j, (_, col))| {
                col.iter()
                    .map(|v| (v - self.mean[j]) / self.std[j])
                    .collect()
            })
            .collect();
        Ok(x.with_same_columns(x.dates().to_vec(), values))
    }

    /// Like [`transform`](Self::transform), but every row must be dated
    /// strictly after `fitted_through`.
    pub fn transform_out_of_sample(
        &self,
        x: &LabeledMatrix,
    ) -> Result<LabeledMatrix, FeatureError> {
        if let Some(fitted_through) = self.fitted_through {
            if let Some(&row_date) = x.dates().iter().find(|d| **d <= fitted_through) {
                return Err(FeatureError::Leakage {
                    fitted_through,
                    row_date,
                });
            }
        }
        self.transform(x)
    }
}

/// Standardize `x`.
///
/// Without `stats`, they are computed from `x` itself (use this only on a
/// training partition). With `stats`, they are applied unchanged and returned
/// as-is.
pub fn standardize(
    x: &LabeledMatrix,
    stats: Option<&ScalingStats>,
) -> Result<(LabeledMatrix, ScalingStats), FeatureError> {
    let stats = match stats {
        Some(s) => s.clone(),
        None => ScalingStats::fit(x),
    };
    let scaled = stats.transform(x)?;
    Ok((scaled, stats))
}

/// A feature table plus the stats used to scale it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub matrix: LabeledMatrix,
    pub scaling: Option<ScalingStats>,
}

/// Last dates of the train and validation partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitBoundary {
    train_end: NaiveDate,
    val_end: NaiveDate,
}

impl SplitBoundary {
    pub fn new(train_end: NaiveDate, val_end: NaiveDate) -> Result<Self, FeatureError> {
        if train_end > val_end {
            return Err(FeatureError::InvalidBoundary { train_end, val_end });
        }
        Ok(Self { train_end, val_end })
    }

    pub fn train_end(&self) -> NaiveDate {
        self.train_end
    }

    pub fn val_end(&self) -> NaiveDate {
        self.val_end
    }
}

/// Split into train (`<= train_end`), val (`<= val_end`), and test (the rest).
///
/// Boundary dates belong to the earlier partition.
pub fn temporal_split(
    data: &LabeledMatrix,
    boundary: &SplitBoundary,
) -> (LabeledMatrix, LabeledMatrix, LabeledMatrix) {
    let SplitBoundary { train_end, val_end } = *boundary;
    let train = data.filter_dates(|d| d <= train_end);
    let val = data.filter_dates(|d| d > train_end && d <= val_end);
    let test = data.filter_dates(|d| d > val_end);
    (train, val, test)
}

/// Build per-ticker features: daily log return and rolling realised vol.
///
/// Columns are `{ticker}_log_ret` then `{ticker}_rv{window}` for each ticker.
/// Rows follow the return index. When `returns` is `None` they are derived
/// from `prices`.
pub fn build_feature_matrix(
    prices: &PriceSeries,
    returns: Option<&ReturnSeries>,
    window: usize,
) -> Result<FeatureMatrix, FeatureError> {
    if window < 2 {
        return Err(FeatureError::InvalidWindow(window));
    }
    let owned;
    let returns = match returns {
        Some(r) => r,
        None => {
            owned = log_returns(prices);
            &owned
        }
    };
    let rv = realized_vol(returns, window);

    let mut columns = Vec::with_capacity(returns.n_cols() * 2);
    for (name, col) in returns.iter_columns() {
        columns.push((format!("{name}_log_ret"), col.to_vec()));
    }
    for (name, col) in rv.iter_columns() {
        columns.push((format!("{name}_rv{window}"), col.to_vec()));
    }

    let matrix = LabeledMatrix::from_columns(returns.dates().to_vec(), columns)?;
    Ok(FeatureMatrix {
        matrix,
        scaling: None,
    })
}

/// Train/val/test features scaled with train-only statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledSplits {
    pub train: FeatureMatrix,
    pub val: FeatureMatrix,
    pub test: FeatureMatrix,
    pub stats: ScalingStats,
}

/// Split `features`, fit scaling on train, and apply it out of sample.
pub fn scale_splits(
    features: &LabeledMatrix,
    boundary: &SplitBoundary,
) -> Result<ScaledSplits, FeatureError> {
    let (train, val, test) = temporal_split(features, boundary);
    let (train_scaled, stats) = standardize(&train, None)?;
    let val_scaled = stats.transform_out_of_sample(&val)?;
    let test_scaled = stats.transform_out_of_sample(&test)?;

    tracing::info!(
        train = train.n_rows(),
        val = val.n_rows(),
        test = test.n_rows(),
        "scaled temporal splits"
    );

    let wrap = |matrix: LabeledMatrix| FeatureMatrix {
        matrix,
        scaling: Some(stats.clone()),
    };
    let train = wrap(train_scaled);
    let val = wrap(val_scaled);
    let test = wrap(test_scaled);
    Ok(ScaledSplits {
        train,
        val,
        test,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn ten_days() -> LabeledMatrix {
        let dates: Vec<NaiveDate> = (1..=10).map(d).collect();
        let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        LabeledMatrix::from_columns(dates, vec![("x".into(), values)]).unwrap()
    }

    #[test]
    fn split_partitions_are_disjoint_and_exhaustive() {
        let data = ten_days();
        let boundary = SplitBoundary::new(d(6), d(8)).unwrap();
        let (train, val, test) = temporal_split(&data, &boundary);

        assert_eq!(train.dates(), &(1..=6).map(d).collect::<Vec<_>>()[..]);
        assert_eq!(val.dates(), &[d(7), d(8)]);
        assert_eq!(test.dates(), &[d(9), d(10)]);
        assert_eq!(train.n_rows() + val.n_rows() + test.n_rows(), data.n_rows());
    }

    #[test]
    fn boundary_must_be_ordered() {
        assert!(matches!(
            SplitBoundary::new(d(8), d(6)),
            Err(FeatureError::InvalidBoundary { .. })
        ));
    }

    #[test]
    fn training_partition_is_centered_and_unit_scaled() {
        let data = ten_days();
        let (scaled, stats) = standardize(&data, None).unwrap();
        let col = scaled.column_at(0);
        assert!(nan_mean(col).abs() < 1e-12);
        assert!((nan_std(col) - 1.0).abs() < 1e-12);
        assert_eq!(stats.fitted_through, Some(d(10)));
    }

    #[test]
    fn supplied_stats_are_applied_unchanged() {
        let data = ten_days();
        let stats = ScalingStats {
            columns: vec!["x".into()],
            mean: vec![1.0],
            std: vec![2.0],
            fitted_through: None,
        };
        let (scaled, returned) = standardize(&data, Some(&stats)).unwrap();
        assert_eq!(returned, stats);
        assert_eq!(scaled.column_at(0)[2], 1.0);
    }

    #[test]
    fn zero_variance_column_becomes_non_finite() {
        let m = LabeledMatrix::from_columns(
            vec![d(1), d(2), d(3)],
            vec![("flat".into(), vec![5.0, 5.0, 5.0])],
        )
        .unwrap();
        let (scaled, stats) = standardize(&m, None).unwrap();
        assert!(stats.std[0].is_nan());
        assert!(scaled.column_at(0).iter().all(|v| !v.is_finite()));
    }

    #[test]
    fn out_of_sample_rejects_overlapping_rows() {
        let data = ten_days();
        let boundary = SplitBoundary::new(d(6), d(8)).unwrap();
        let (train, _, _) = temporal_split(&data, &boundary);
        let stats = ScalingStats::fit(&train);

        let err = stats.transform_out_of_sample(&data).unwrap_err();
        assert_eq!(
            err,
            FeatureError::Leakage {
                fitted_through: d(6),
                row_date: d(1)
            }
        );
    }

    #[test]
    fn mismatched_columns_are_rejected() {
        let data = ten_days();
        let stats = ScalingStats {
            columns: vec!["y".into()],
            mean: vec![0.0],
            std: vec![1.0],
            fitted_through: None,
        };
        assert!(matches!(
            standardize(&data, Some(&stats)),
            Err(FeatureError::ColumnMismatch { .. })
        ));
    }

    #[test]
    fn scale_splits_uses_train_stats_everywhere() {
        let data = ten_days();
        let boundary = SplitBoundary::new(d(6), d(8)).unwrap();
        let splits = scale_splits(&data, &boundary).unwrap();

        // Train mean of 1..=6 is 3.5; val/test are not re-centered.
        assert!((splits.stats.mean[0] - 3.5).abs() < 1e-12);
        assert!(nan_mean(splits.test.matrix.column_at(0)) > 1.0);
        assert_eq!(splits.val.scaling.as_ref(), Some(&splits.stats));
    }

    #[test]
    fn feature_matrix_has_return_and_vol_columns() {
        let dates: Vec<NaiveDate> = (1..=8).map(d).collect();
        let prices = PriceSeries::from_columns(
            dates,
            vec![("SPY".into(), vec![100.0, 101.0, 99.0, 102.0, 104.0, 103.0, 105.0, 106.0])],
        )
        .unwrap();
        let fm = build_feature_matrix(&prices, None, 3).unwrap();
        assert_eq!(fm.matrix.columns(), &["SPY_log_ret".to_string(), "SPY_rv3".to_string()]);
        assert_eq!(fm.matrix.n_rows(), 7);
        assert!(fm.matrix.column("SPY_rv3").unwrap()[1].is_nan());
        assert!(fm.matrix.column("SPY_rv3").unwrap()[2].is_finite());
        assert!(fm.scaling.is_none());
    }

    #[test]
    fn feature_window_below_two_is_rejected() {
        let dates: Vec<NaiveDate> = (1..=4).map(d).collect();
        let prices =
            PriceSeries::from_columns(dates, vec![("SPY".into(), vec![100.0, 101.0, 99.0, 102.0])])
                .unwrap();
        assert_eq!(
            build_feature_matrix(&prices, None, 1).unwrap_err(),
            FeatureError::InvalidWindow(1)
        );
        assert!(build_feature_matrix(&prices, None, 2).is_ok());
    }
}
