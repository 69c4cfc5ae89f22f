//! End-to-end preparation: fetch → clean → validate → log returns, with a
//! read-through, write-through cache at the cleaned+returns boundary.

use crate::data::cache::{normalize_tickers, PipelineCache};
use crate::data::clean::{clean, validate, DataValidationError, ValidationRules, DEFAULT_MIN_ROWS};
use crate::data::frame::{PriceSeries, ReturnSeries};
use crate::data::provider::{DataError, DataSource, PriceProvider};
use crate::data::returns::log_returns;
use chrono::{Days, NaiveDate};
use thiserror::Error;

/// S&P 500 index symbol used as the benchmark.
pub const BENCHMARK_SYMBOL: &str = "^GSPC";

/// 10-year Treasury yield index, quoted in percent.
pub const RISK_FREE_SYMBOL: &str = "^TNX";

/// Calendar days looked back for the latest risk-free quote.
const RISK_FREE_LOOKBACK_DAYS: u64 = 14;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no tickers requested")]
    NoTickers,

    #[error("start date {start} is after end date {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Validation(#[from] DataValidationError),
}

/// Validated prices and their log returns.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanData {
    /// Sorted, deduplicated tickers; the column order of both tables.
    pub tickers: Vec<String>,
    pub prices: PriceSeries,
    pub returns: ReturnSeries,
    pub source: DataSource,
}

/// Pipeline over one provider, with an optional cache.
pub struct Pipeline<'a> {
    provider: &'a dyn PriceProvider,
    cache: Option<&'a PipelineCache>,
    min_rows: usize,
}

impl<'a> Pipeline<'a> {
    pub fn new(provider: &'a dyn PriceProvider) -> Self {
        Self {
            provider,
            cache: None,
            min_rows: DEFAULT_MIN_ROWS,
        }
    }

    pub fn with_cache(mut self, cache: &'a PipelineCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_min_rows(mut self, min_rows: usize) -> Self {
        self.min_rows = min_rows;
        self
    }

    /// Cleaned prices and returns for `tickers` over `[start, end]`.
    ///
    /// A cache hit skips the provider entirely. A failed cache write is
    /// logged and the freshly computed data is still returned.
    pub fn get_clean_data<S: AsRef<str>>(
        &self,
        tickers: &[S],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<CleanData, PipelineError> {
        let tickers = normalize_tickers(tickers);
        if tickers.is_empty() {
            return Err(PipelineError::NoTickers);
        }
        if start > end {
            return Err(PipelineError::InvalidRange { start, end });
        }

        if let Some(cache) = self.cache {
            if let Some((prices, returns)) = cache.load(&tickers, start, end) {
                tracing::info!(tickers = ?tickers, rows = prices.n_rows(), "loaded from cache");
                return Ok(CleanData {
                    tickers,
                    prices,
                    returns,
                    source: DataSource::Cache,
                });
            }
        }

        let raw = self.provider.fetch_prices(&tickers, start, end)?;
        tracing::info!(
            provider = self.provider.name(),
            rows = raw.n_rows(),
            cols = raw.n_cols(),
            "raw data"
        );

        let prices = clean(&raw);
        validate(&prices, &ValidationRules::new(self.min_rows, tickers.len()))?;
        let returns = log_returns(&prices);

        if let Some(cache) = self.cache {
            if let Err(e) = cache.save(&prices, &returns, &tickers, start, end) {
                tracing::warn!(error = %e, "failed to write pipeline cache");
            }
        }

        Ok(CleanData {
            tickers,
            prices,
            returns,
            source: self.provider.source(),
        })
    }
}

/// S&P 500 closes over `[start, end]`, forward-filled with leading gaps dropped.
pub fn fetch_benchmark(
    provider: &dyn PriceProvider,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<PriceSeries, DataError> {
    let raw = provider.fetch_prices(&[BENCHMARK_SYMBOL.to_string()], start, end)?;
    let benchmark = clean(&raw);
    if benchmark.is_empty() {
        return Err(DataError::SymbolNotFound {
            symbol: BENCHMARK_SYMBOL.to_string(),
        });
    }
    Ok(benchmark)
}

/// Latest 10-year Treasury yield on or before `as_of`, as a decimal.
pub fn fetch_risk_free_rate(provider: &dyn PriceProvider, as_of: NaiveDate) -> Result<f64, DataError> {
    let start = as_of
        .checked_sub_days(Days::new(RISK_FREE_LOOKBACK_DAYS))
        .unwrap_or(as_of);
    let raw = provider.fetch_prices(&[RISK_FREE_SYMBOL.to_string()], start, as_of)?;
    let yields = clean(&raw);
    let last = yields
        .column(RISK_FREE_SYMBOL)
        .and_then(|col| col.last().copied())
        .ok_or_else(|| DataError::SymbolNotFound {
            symbol: RISK_FREE_SYMBOL.to_string(),
        })?;
    let rate = last / 100.0;
    tracing::debug!(%as_of, rate, "risk-free rate");
    Ok(rate)
}
