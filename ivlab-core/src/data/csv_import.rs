//! Wide-table CSV price provider for offline use.
//!
//! Expected layout: a `date` column (`YYYY-MM-DD`) followed by one close
//! column per ticker. Blank or unparseable cells are missing values.

use super::align::{union_align, DailyClose};
use super::frame::PriceSeries;
use super::provider::{DataError, DataSource, PriceProvider};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

pub struct CsvPriceProvider {
    path: PathBuf,
}

impl CsvPriceProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read a wide close table, keeping only `tickers` and dates in `[start, end]`.
pub fn read_wide_csv<R: Read>(
    reader: R,
    tickers: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<PriceSeries, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| DataError::CsvError(format!("failed to read CSV headers: {e}")))?
        .clone();

    match headers.get(0) {
        Some(h) if h.eq_ignore_ascii_case("date") => {}
        other => {
            return Err(DataError::CsvError(format!(
                "first column must be 'date', found {:?}",
                other.unwrap_or("")
            )))
        }
    }

    let mut positions = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        let idx = headers
            .iter()
            .position(|h| h == ticker)
            .ok_or_else(|| DataError::SymbolNotFound {
                symbol: ticker.clone(),
            })?;
        positions.push((ticker, idx));
    }

    let mut series: HashMap<String, Vec<DailyClose>> = HashMap::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| DataError::CsvError(e.to_string()))?;
        let raw_date = record.get(0).unwrap_or("");
        let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d").map_err(|e| {
            // +2: header row and 1-based numbering
            DataError::CsvError(format!("line {}: bad date {raw_date:?}: {e}", line + 2))
        })?;
        if date < start || date > end {
            continue;
        }

        for &(ticker, idx) in &positions {
            let close = record
                .get(idx)
                .and_then(|cell| cell.parse::<f64>().ok())
                .unwrap_or(f64::NAN);
            series
                .entry(ticker.clone())
                .or_default()
                .push(DailyClose { date, close });
        }
    }

    Ok(union_align(tickers, &series)?)
}

impl PriceProvider for CsvPriceProvider {
    fn name(&self) -> &str {
        "csv_import"
    }

    fn source(&self) -> DataSource {
        DataSource::CsvImport
    }

    fn fetch_prices(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, DataError> {
        let file = std::fs::File::open(&self.path).map_err(|e| {
            DataError::CsvError(format!("cannot open {}: {e}", self.path.display()))
        })?;
        let prices = read_wide_csv(file, tickers, start, end)?;
        tracing::info!(
            path = %self.path.display(),
            rows = prices.n_rows(),
            cols = prices.n_cols(),
            "imported CSV prices"
        );
        Ok(prices)
    }

    fn is_available(&self) -> bool {
        self.path.is_file()
    }
}
