//! Market-data provider traits and structured error types.
//!
//! `PriceProvider` and `OptionsProvider` abstract over data sources (Yahoo
//! Finance, CSV import, synthetic) so the pipeline and the IV engine can be
//! driven by mocks in tests. The cache layers sit above these traits;
//! providers don't know about caching.

use super::frame::{FrameError, PriceSeries};
use crate::options::OptionQuote;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error types for data operations.
///
/// These are designed to be displayable in CLI output as-is.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("csv import error: {0}")]
    CsvError(String),

    #[error("malformed table: {0}")]
    Frame(#[from] FrameError),

    #[error("data error: {0}")]
    Other(String),
}

/// Where a cleaned dataset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    YahooFinance,
    CsvImport,
    Synthetic,
    Cache,
}

/// Source of raw daily close prices.
///
/// Implementations return one column per requested ticker on the union of
/// all dates any ticker traded, with `NaN` where a ticker has no
/// observation. Cleaning and validation happen downstream.
pub trait PriceProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Provenance tag recorded on datasets built from this provider.
    fn source(&self) -> DataSource;

    /// Fetch raw close prices for `tickers` over `[start, end]`.
    fn fetch_prices(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, DataError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}

/// Source of spot quotes and listed options chains.
pub trait OptionsProvider: Send + Sync {
    /// Current tradable price, if the provider reports a usable one.
    fn spot_price(&self, symbol: &str) -> Result<Option<f64>, DataError>;

    /// Daily closes for the most recent `days` sessions, oldest first.
    fn recent_closes(&self, symbol: &str, days: u32) -> Result<Vec<f64>, DataError>;

    /// Listed expiration dates, nearest first.
    fn expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, DataError>;

    /// Call contracts for one expiration, in the provider's native order.
    fn call_chain(&self, symbol: &str, expiry: NaiveDate) -> Result<Vec<OptionQuote>, DataError>;
}

impl<T: OptionsProvider + ?Sized> OptionsProvider for &T {
    fn spot_price(&self, symbol: &str) -> Result<Option<f64>, DataError> {
        (**self).spot_price(symbol)
    }

    fn recent_closes(&self, symbol: &str, days: u32) -> Result<Vec<f64>, DataError> {
        (**self).recent_closes(symbol, days)
    }

    fn expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, DataError> {
        (**self).expirations(symbol)
    }

    fn call_chain(&self, symbol: &str, expiry: NaiveDate) -> Result<Vec<OptionQuote>, DataError> {
        (**self).call_chain(symbol, expiry)
    }
}
