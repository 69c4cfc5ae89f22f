//! Yahoo Finance data provider.
//!
//! Daily closes come from the v8 chart API; spot quotes, expirations and call
//! chains come from the v7 options API. Every request goes through the same
//! retry loop with exponential backoff and the shared circuit breaker.
//!
//! Yahoo Finance has no official API and is subject to unannounced format changes.
//! The CSV provider is the fallback when Yahoo is unavailable.

use super::align::{union_align, DailyClose};
use super::circuit_breaker::CircuitBreaker;
use super::frame::PriceSeries;
use super::provider::{DataError, DataSource, OptionsProvider, PriceProvider};
use crate::options::OptionQuote;
use chrono::{DateTime, NaiveDate, NaiveTime};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const CHART_BASE: &str = "https://query2.finance.yahoo.com/v8/finance/chart";
const OPTIONS_BASE: &str = "https://query2.finance.yahoo.com/v7/finance/options";

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Yahoo Finance v7 options API response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsResponse {
    option_chain: OptionChainResult,
}

#[derive(Debug, Deserialize)]
struct OptionChainResult {
    result: Option<Vec<OptionChainData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionChainData {
    #[serde(default)]
    expiration_dates: Vec<i64>,
    quote: Option<UnderlyingQuote>,
    #[serde(default)]
    options: Vec<ExpirySlice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnderlyingQuote {
    regular_market_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ExpirySlice {
    #[serde(default)]
    calls: Vec<ContractData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractData {
    strike: f64,
    bid: Option<f64>,
    ask: Option<f64>,
    last_price: Option<f64>,
    implied_volatility: Option<f64>,
}

fn api_error(symbol: &str, error: Option<ApiError>) -> DataError {
    match error {
        Some(err) if err.code == "Not Found" => DataError::SymbolNotFound {
            symbol: symbol.to_string(),
        },
        Some(err) => DataError::ResponseFormatChanged(format!("{}: {}", err.code, err.description)),
        None => DataError::ResponseFormatChanged("empty result with no error".into()),
    }
}

fn ts_to_date(ts: i64) -> Result<NaiveDate, DataError> {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.naive_utc().date())
        .ok_or_else(|| DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))
}

fn date_to_ts(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

/// Parse a chart response into daily closes, preferring the adjusted close.
fn parse_chart(symbol: &str, resp: ChartResponse) -> Result<Vec<DailyClose>, DataError> {
    let data = resp
        .chart
        .result
        .ok_or_else(|| api_error(symbol, resp.chart.error))?
        .into_iter()
        .next()
        .ok_or_else(|| DataError::ResponseFormatChanged("result array is empty".into()))?;

    let timestamps = data
        .timestamp
        .ok_or_else(|| DataError::ResponseFormatChanged("no timestamps".into()))?;

    let closes = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| DataError::ResponseFormatChanged("no quote data".into()))?
        .close;

    let adj_closes = data
        .indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose);

    let mut out = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let adj = adj_closes
            .as_ref()
            .and_then(|v| v.get(i).copied().flatten())
            .filter(|c| c.is_finite());
        let raw = closes.get(i).copied().flatten();

        // Holidays and halted sessions come back with nulls
        let Some(close) = adj.or(raw) else {
            continue;
        };
        out.push(DailyClose {
            date: ts_to_date(ts)?,
            close,
        });
    }

    if out.is_empty() {
        return Err(DataError::SymbolNotFound {
            symbol: symbol.to_string(),
        });
    }
    Ok(out)
}

fn first_chain(symbol: &str, resp: OptionsResponse) -> Result<OptionChainData, DataError> {
    resp.option_chain
        .result
        .ok_or_else(|| api_error(symbol, resp.option_chain.error))?
        .into_iter()
        .next()
        .ok_or_else(|| DataError::SymbolNotFound {
            symbol: symbol.to_string(),
        })
}

fn parse_calls(data: OptionChainData, expiry: NaiveDate) -> Vec<OptionQuote> {
    data.options
        .into_iter()
        .next()
        .map(|slice| slice.calls)
        .unwrap_or_default()
        .into_iter()
        .map(|c| OptionQuote {
            strike: c.strike,
            bid: c.bid,
            ask: c.ask,
            last_price: c.last_price,
            provider_iv: c.implied_volatility,
            expiry,
        })
        .collect()
}

/// Yahoo Finance data provider.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl YahooProvider {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    /// Chart URL for a symbol over `[start, end]`, both inclusive.
    fn chart_url(symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
        let start_ts = date_to_ts(start);
        let end_ts = date_to_ts(end) + 86_399;
        format!(
            "{CHART_BASE}/{symbol}?period1={start_ts}&period2={end_ts}&interval=1d\
             &includeAdjustedClose=true"
        )
    }

    fn options_url(symbol: &str, expiry: Option<NaiveDate>) -> String {
        match expiry {
            Some(date) => format!("{OPTIONS_BASE}/{symbol}?date={}", date_to_ts(date)),
            None => format!("{OPTIONS_BASE}/{symbol}"),
        }
    }

    /// GET `url` and decode JSON, with retry and circuit breaker logic.
    fn fetch_json<T: DeserializeOwned>(&self, symbol: &str, url: &str) -> Result<T, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                tracing::debug!(symbol, attempt, ?delay, "retrying Yahoo request");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }

            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::FORBIDDEN {
                        // IP ban
                        self.circuit_breaker.trip();
                        return Err(DataError::CircuitBreakerTripped);
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        self.circuit_breaker.record_failure();
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        last_error = Some(DataError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if status == reqwest::StatusCode::UNAUTHORIZED {
                        return Err(DataError::AuthenticationRequired(
                            "Yahoo Finance requires authentication".into(),
                        ));
                    }

                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(DataError::SymbolNotFound {
                            symbol: symbol.to_string(),
                        });
                    }

                    if !status.is_success() {
                        self.circuit_breaker.record_failure();
                        last_error = Some(DataError::Other(format!("HTTP {status} for {symbol}")));
                        continue;
                    }

                    let body: T = resp.json().map_err(|e| {
                        DataError::ResponseFormatChanged(format!(
                            "failed to parse response for {symbol}: {e}"
                        ))
                    })?;
                    self.circuit_breaker.record_success();
                    return Ok(body);
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                        continue;
                    }
                    return Err(DataError::NetworkUnreachable(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }

    fn fetch_closes(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyClose>, DataError> {
        let chart: ChartResponse = self.fetch_json(symbol, &Self::chart_url(symbol, start, end))?;
        parse_chart(symbol, chart)
    }

    fn fetch_chain(&self, symbol: &str, expiry: Option<NaiveDate>) -> Result<OptionChainData, DataError> {
        let resp: OptionsResponse = self.fetch_json(symbol, &Self::options_url(symbol, expiry))?;
        first_chain(symbol, resp)
    }
}

impl PriceProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn source(&self) -> DataSource {
        DataSource::YahooFinance
    }

    fn fetch_prices(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, DataError> {
        let mut series = HashMap::with_capacity(tickers.len());
        for ticker in tickers {
            match self.fetch_closes(ticker, start, end) {
                Ok(closes) => {
                    tracing::debug!(ticker = %ticker, rows = closes.len(), "fetched closes");
                    series.insert(ticker.clone(), closes);
                }
                // An unknown ticker becomes an all-missing column; validation reports it.
                Err(DataError::SymbolNotFound { symbol }) => {
                    tracing::warn!(%symbol, "symbol not found, leaving column empty");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(union_align(tickers, &series)?)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

impl OptionsProvider for YahooProvider {
    fn spot_price(&self, symbol: &str) -> Result<Option<f64>, DataError> {
        let data = self.fetch_chain(symbol, None)?;
        Ok(data.quote.and_then(|q| q.regular_market_price))
    }

    fn recent_closes(&self, symbol: &str, days: u32) -> Result<Vec<f64>, DataError> {
        let url = format!("{CHART_BASE}/{symbol}?range={days}d&interval=1d");
        let chart: ChartResponse = self.fetch_json(symbol, &url)?;
        match parse_chart(symbol, chart) {
            Ok(closes) => Ok(closes.into_iter().map(|c| c.close).collect()),
            Err(DataError::SymbolNotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, DataError> {
        let data = self.fetch_chain(symbol, None)?;
        let mut dates = data
            .expiration_dates
            .into_iter()
            .map(ts_to_date)
            .collect::<Result<Vec<_>, _>>()?;
        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    fn call_chain(&self, symbol: &str, expiry: NaiveDate) -> Result<Vec<OptionQuote>, DataError> {
        let data = self.fetch_chain(symbol, Some(expiry))?;
        Ok(parse_calls(data, expiry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_prefers_adjusted_close_and_skips_nulls() {
        let body = r#"{"chart":{"result":[{
            "timestamp":[1704205800,1704292200,1704378600],
            "indicators":{
                "quote":[{"close":[185.6,null,181.9]}],
                "adjclose":[{"adjclose":[184.9,null,null]}]
            }}],"error":null}}"#;
        let resp: ChartResponse = serde_json::from_str(body).unwrap();
        let closes = parse_chart("AAPL", resp).unwrap();

        assert_eq!(closes.len(), 2);
        assert_eq!(closes[0].close, 184.9);
        assert_eq!(closes[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(closes[1].close, 181.9);
    }

    #[test]
    fn chart_not_found_maps_to_symbol_error() {
        let body = r#"{"chart":{"result":null,
            "error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let resp: ChartResponse = serde_json::from_str(body).unwrap();
        assert!(matches!(
            parse_chart("ZZZZ", resp),
            Err(DataError::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn options_chain_parses_calls_and_spot() {
        let body = r#"{"optionChain":{"result":[{
            "underlyingSymbol":"AAPL",
            "expirationDates":[1710460800,1711065600],
            "quote":{"regularMarketPrice":182.5},
            "options":[{"expirationDate":1710460800,
                "calls":[
                    {"strike":180.0,"bid":4.1,"ask":4.3,"lastPrice":4.2,"impliedVolatility":0.24},
                    {"strike":185.0,"lastPrice":1.9}
                ],
                "puts":[]}]
            }],"error":null}}"#;
        let resp: OptionsResponse = serde_json::from_str(body).unwrap();
        let data = first_chain("AAPL", resp).unwrap();

        assert_eq!(data.quote.as_ref().and_then(|q| q.regular_market_price), Some(182.5));
        assert_eq!(
            ts_to_date(data.expiration_dates[0]).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
        );

        let expiry = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let calls = parse_calls(data, expiry);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].provider_iv, Some(0.24));
        assert_eq!(calls[1].bid, None);
        assert_eq!(calls[1].last_price, Some(1.9));
        assert!(calls.iter().all(|c| c.expiry == expiry));
    }

    #[test]
    fn chart_url_covers_inclusive_range() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let url = YahooProvider::chart_url("SPY", d, d);
        assert!(url.contains("period1=1704153600"));
        assert!(url.contains("period2=1704239999"));
    }
}
