//! Date-indexed labeled matrix.
//!
//! `LabeledMatrix` is the single table type behind price, return, and feature
//! data. It stores one shared date index and one column vector per label, so
//! every column is aligned to the same axis by construction. Missing cells are
//! `NaN`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Shape errors raised when building a matrix.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("column '{column}' has {actual} rows but the date index has {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("{names} column names but {vectors} column vectors")]
    ColumnCountMismatch { names: usize, vectors: usize },

    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("column names must be non-empty")]
    EmptyColumnName,
}

/// Table of `f64` values keyed by (date, column label).
///
/// Deserialization goes through [`LabeledMatrix::new`], so a decoded table
/// carries the same shape guarantees as a constructed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMatrix")]
pub struct LabeledMatrix {
    dates: Vec<NaiveDate>,
    columns: Vec<String>,
    values: Vec<Vec<f64>>,
}

/// Unchecked wire form of [`LabeledMatrix`].
#[derive(Deserialize)]
struct RawMatrix {
    dates: Vec<NaiveDate>,
    columns: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl TryFrom<RawMatrix> for LabeledMatrix {
    type Error = FrameError;

    fn try_from(raw: RawMatrix) -> Result<Self, Self::Error> {
        Self::new(raw.dates, raw.columns, raw.values)
    }
}

/// Close prices, one column per ticker.
pub type PriceSeries = LabeledMatrix;

/// Daily log returns, one column per ticker.
pub type ReturnSeries = LabeledMatrix;

impl LabeledMatrix {
    /// Build a matrix from a date index, column labels, and column-major values.
    pub fn new(
        dates: Vec<NaiveDate>,
        columns: Vec<String>,
        values: Vec<Vec<f64>>,
    ) -> Result<Self, FrameError> {
        if columns.len() != values.len() {
            return Err(FrameError::ColumnCountMismatch {
                names: columns.len(),
                vectors: values.len(),
            });
        }

        let mut seen = HashSet::with_capacity(columns.len());
        for (name, column) in columns.iter().zip(&values) {
            if name.is_empty() {
                return Err(FrameError::EmptyColumnName);
            }
            if !seen.insert(name.as_str()) {
                return Err(FrameError::DuplicateColumn(name.clone()));
            }
            if column.len() != dates.len() {
                return Err(FrameError::LengthMismatch {
                    column: name.clone(),
                    expected: dates.len(),
                    actual: column.len(),
                });
            }
        }

        Ok(Self {
            dates,
            columns,
            values,
        })
    }

    /// Build a matrix from `(label, values)` pairs.
    pub fn from_columns(
        dates: Vec<NaiveDate>,
        columns: Vec<(String, Vec<f64>)>,
    ) -> Result<Self, FrameError> {
        let (names, values) = columns.into_iter().unzip();
        Self::new(dates, names, values)
    }

    /// Rebuild with the same labels but a new index and values.
    ///
    /// Callers guarantee every vector has `dates.len()` entries.
    pub(crate) fn with_same_columns(&self, dates: Vec<NaiveDate>, values: Vec<Vec<f64>>) -> Self {
        debug_assert_eq!(values.len(), self.columns.len());
        debug_assert!(values.iter().all(|v| v.len() == dates.len()));
        Self {
            dates,
            columns: self.columns.clone(),
            values,
        }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.dates.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Values of the column with the given label.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| self.values[i].as_slice())
    }

    /// Values of the column at position `index`.
    pub fn column_at(&self, index: usize) -> &[f64] {
        &self.values[index]
    }

    /// Iterate `(label, values)` pairs in column order.
    pub fn iter_columns(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(Vec::as_slice))
    }

    /// Cell value at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[col][row]
    }

    /// Number of cells holding a non-missing value.
    pub fn observed_count(&self) -> usize {
        self.values
            .iter()
            .map(|col| col.iter().filter(|v| !v.is_nan()).count())
            .sum()
    }

    /// Number of missing (`NaN`) cells.
    pub fn missing_count(&self) -> usize {
        self.n_rows() * self.n_cols() - self.observed_count()
    }

    /// True when every row has a value in every column.
    pub fn row_is_complete(&self, row: usize) -> bool {
        self.values.iter().all(|col| !col[row].is_nan())
    }

    /// True when the date index is sorted with no repeated dates.
    pub fn has_strictly_increasing_dates(&self) -> bool {
        self.dates.windows(2).all(|w| w[0] < w[1])
    }

    /// New matrix holding the rows at `indices`, in that order.
    pub fn take_rows(&self, indices: &[usize]) -> Self {
        let dates = indices.iter().map(|&i| self.dates[i]).collect();
        let values = self
            .values
            .iter()
            .map(|col| indices.iter().map(|&i| col[i]).collect())
            .collect();
        self.with_same_columns(dates, values)
    }

    /// New matrix holding the rows whose date satisfies `keep`.
    pub fn filter_dates(&self, keep: impl Fn(NaiveDate) -> bool) -> Self {
        let indices: Vec<usize> = self
            .dates
            .iter()
            .enumerate()
            .filter(|(_, d)| keep(**d))
            .map(|(i, _)| i)
            .collect();
        self.take_rows(&indices)
    }

    /// Split into parts: (dates, column labels, column-major values).
    pub fn into_parts(self) -> (Vec<NaiveDate>, Vec<String>, Vec<Vec<f64>>) {
        (self.dates, self.columns, self.values)
    }
}
