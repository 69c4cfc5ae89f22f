//! Content-addressed Parquet cache for cleaned prices and returns.
//!
//! Layout: `{cache_dir}/pipeline/{key}/{prices,returns}.parquet` plus a
//! `meta.json` sidecar. `key` is a 16-hex-char BLAKE3 digest over the sorted,
//! deduplicated ticker list and the date range, so ticker order never
//! changes the entry a request maps to.
//!
//! - Atomic writes (uniquely named temp file, renamed into place)
//! - Entries are overwritten wholesale, never patched
//! - Any read failure (missing, truncated, wrong schema, inconsistent shapes)
//!   is a miss, never an error

use super::frame::{LabeledMatrix, PriceSeries, ReturnSeries};
use super::provider::DataError;
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the date column in cached Parquet files.
const DATE_COLUMN: &str = "date";

const PRICES_FILE: &str = "prices.parquet";
const RETURNS_FILE: &str = "returns.parquet";
const META_FILE: &str = "meta.json";

/// Sort and deduplicate a ticker list.
pub fn normalize_tickers<S: AsRef<str>>(tickers: &[S]) -> Vec<String> {
    let mut out: Vec<String> = tickers.iter().map(|t| t.as_ref().to_string()).collect();
    out.sort();
    out.dedup();
    out
}

/// Deterministic 16-hex-char identifier for a (tickers, start, end) request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive<S: AsRef<str>>(tickers: &[S], start: NaiveDate, end: NaiveDate) -> Self {
        let material = format!(
            "{}_{}_{}",
            normalize_tickers(tickers).join("_"),
            start.format("%Y%m%d"),
            end.format("%Y%m%d")
        );
        let hex = blake3::hash(material.as_bytes()).to_hex();
        Self(hex[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata sidecar for a cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub key: CacheKey,
    pub tickers: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub rows: usize,
    pub data_hash: String,
    pub cached_at: chrono::NaiveDateTime,
}

/// Why a cache read was turned into a miss.
#[derive(Debug, Error)]
enum CacheReadError {
    #[error("no entry at {0}")]
    Missing(PathBuf),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("parquet decode failed: {0}")]
    Parquet(#[from] PolarsError),

    #[error("schema mismatch: {0}")]
    Schema(String),

    #[error("inconsistent entry: {0}")]
    Inconsistent(String),
}

/// On-disk cache of cleaned prices and their log returns.
pub struct PipelineCache {
    cache_dir: PathBuf,
}

impl PipelineCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn pipeline_dir(&self) -> PathBuf {
        self.cache_dir.join("pipeline")
    }

    /// Directory owned by one key: `{cache_dir}/pipeline/{key}/`
    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.pipeline_dir().join(key.as_str())
    }

    /// Load the cleaned prices and returns for a request, if cached intact.
    pub fn load<S: AsRef<str>>(
        &self,
        tickers: &[S],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Option<(PriceSeries, ReturnSeries)> {
        let key = CacheKey::derive(tickers, start, end);
        match self.read_entry(&key, &normalize_tickers(tickers)) {
            Ok(pair) => {
                tracing::debug!(%key, rows = pair.0.n_rows(), "pipeline cache hit");
                Some(pair)
            }
            Err(CacheReadError::Missing(_)) => {
                tracing::debug!(%key, "pipeline cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(%key, error = %e, "treating unreadable cache entry as a miss");
                None
            }
        }
    }

    fn read_entry(
        &self,
        key: &CacheKey,
        tickers: &[String],
    ) -> Result<(PriceSeries, ReturnSeries), CacheReadError> {
        let dir = self.entry_dir(key);
        let prices_path = dir.join(PRICES_FILE);
        let returns_path = dir.join(RETURNS_FILE);
        if !prices_path.exists() || !returns_path.exists() {
            return Err(CacheReadError::Missing(dir));
        }

        let prices = read_matrix(&prices_path)?;
        let returns = read_matrix(&returns_path)?;

        if sorted_columns(&prices) != tickers {
            return Err(CacheReadError::Inconsistent(format!(
                "columns {:?} do not match tickers {tickers:?}",
                prices.columns()
            )));
        }
        if returns.columns() != prices.columns() {
            return Err(CacheReadError::Inconsistent(
                "returns columns differ from prices".into(),
            ));
        }
        if returns.n_rows() + 1 != prices.n_rows() {
            return Err(CacheReadError::Inconsistent(format!(
                "{} price rows but {} return rows",
                prices.n_rows(),
                returns.n_rows()
            )));
        }

        Ok((prices, returns))
    }

    /// Persist cleaned prices and returns, replacing any previous entry.
    pub fn save<S: AsRef<str>>(
        &self,
        prices: &PriceSeries,
        returns: &ReturnSeries,
        tickers: &[S],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), DataError> {
        let normalized = normalize_tickers(tickers);
        if sorted_columns(prices) != normalized {
            return Err(DataError::CacheError(format!(
                "price columns {:?} do not match tickers {normalized:?}",
                prices.columns()
            )));
        }
        if returns.columns() != prices.columns() {
            return Err(DataError::CacheError(
                "returns columns differ from prices".into(),
            ));
        }

        let key = CacheKey::derive(tickers, start, end);
        let dir = self.entry_dir(&key);
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;

        write_matrix(prices, &dir.join(PRICES_FILE))?;
        write_matrix(returns, &dir.join(RETURNS_FILE))?;

        let meta = CacheMeta {
            key: key.clone(),
            tickers: normalized,
            start,
            end,
            rows: prices.n_rows(),
            data_hash: content_hash(prices),
            cached_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::CacheError(format!("meta serialization: {e}")))?;
        write_atomic(&dir.join(META_FILE), |file| {
            file.write_all(meta_json.as_bytes())
                .map_err(|e| DataError::CacheError(format!("meta write: {e}")))
        })?;

        tracing::info!(%key, rows = prices.n_rows(), dir = %dir.display(), "cached cleaned data");
        Ok(())
    }

    /// Metadata for one entry, if present and readable.
    pub fn get_meta(&self, key: &CacheKey) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.entry_dir(key).join(META_FILE)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Metadata of every readable entry, sorted by key.
    pub fn entries(&self) -> Vec<CacheMeta> {
        let Ok(read_dir) = fs::read_dir(self.pipeline_dir()) else {
            return Vec::new();
        };
        let mut metas: Vec<CacheMeta> = read_dir
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let content = fs::read_to_string(entry.path().join(META_FILE)).ok()?;
                serde_json::from_str(&content).ok()
            })
            .collect();
        metas.sort_by(|a, b| a.key.as_str().cmp(b.key.as_str()));
        metas
    }
}

/// Deterministic BLAKE3 hash over a table's labels, dates, and values.
pub fn content_hash(matrix: &LabeledMatrix) -> String {
    let mut hasher = blake3::Hasher::new();
    for date in matrix.dates() {
        hasher.update(date.to_string().as_bytes());
    }
    for (name, values) in matrix.iter_columns() {
        hasher.update(name.as_bytes());
        for v in values {
            hasher.update(&v.to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

/// Column labels in sorted order, for comparison against normalized tickers.
fn sorted_columns(matrix: &LabeledMatrix) -> Vec<String> {
    let mut columns = matrix.columns().to_vec();
    columns.sort();
    columns
}

/// Stage `write` in a uniquely named temp file beside `path`, then rename over it.
///
/// Concurrent writers never share a temp file; the last rename wins.
fn write_atomic<F>(path: &Path, write: F) -> Result<(), DataError>
where
    F: FnOnce(&mut fs::File) -> Result<(), DataError>,
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| DataError::CacheError(format!("create temp file: {e}")))?;
    write(tmp.as_file_mut())?;
    tmp.persist(path)
        .map_err(|e| DataError::CacheError(format!("atomic rename failed: {}", e.error)))?;
    Ok(())
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// Days since 1970-01-01 for the Parquet `Date` type.
fn epoch() -> NaiveDate {
    NaiveDate::default()
}

/// Convert a matrix to a DataFrame: a `date` column then one f64 column per label.
fn matrix_to_dataframe(matrix: &LabeledMatrix) -> Result<DataFrame, DataError> {
    let epoch = epoch();
    let days: Vec<i32> = matrix
        .dates()
        .iter()
        .map(|d| (*d - epoch).num_days() as i32)
        .collect();

    let mut columns = Vec::with_capacity(matrix.n_cols() + 1);
    columns.push(
        Column::new(DATE_COLUMN.into(), days)
            .cast(&DataType::Date)
            .map_err(|e| DataError::ParquetError(format!("date cast: {e}")))?,
    );
    for (name, values) in matrix.iter_columns() {
        if name == DATE_COLUMN {
            return Err(DataError::CacheError(format!(
                "column label '{DATE_COLUMN}' is reserved"
            )));
        }
        columns.push(Column::new(name.into(), values.to_vec()));
    }

    DataFrame::new(columns)
        .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

/// Write a matrix to `path` via a temp file and rename.
fn write_matrix(matrix: &LabeledMatrix, path: &Path) -> Result<(), DataError> {
    let mut df = matrix_to_dataframe(matrix)?;
    write_atomic(path, |file| {
        ParquetWriter::new(file)
            .finish(&mut df)
            .map(|_| ())
            .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))
    })
}

/// Load a Parquet file back into a matrix.
fn read_matrix(path: &Path) -> Result<LabeledMatrix, CacheReadError> {
    let file = fs::File::open(path)?;
    let df = ParquetReader::new(file).finish()?;
    dataframe_to_matrix(&df)
}

fn dataframe_to_matrix(df: &DataFrame) -> Result<LabeledMatrix, CacheReadError> {
    let date_ca = df
        .column(DATE_COLUMN)
        .map_err(|_| CacheReadError::Schema(format!("missing column '{DATE_COLUMN}'")))?
        .date()
        .map_err(|e| CacheReadError::Schema(format!("date column type: {e}")))?;

    let epoch = epoch();
    let n = df.height();
    let mut dates = Vec::with_capacity(n);
    for i in 0..n {
        let days = date_ca
            .get(i)
            .ok_or_else(|| CacheReadError::Schema(format!("null date at row {i}")))?;
        dates.push(epoch + chrono::Duration::days(days as i64));
    }

    let mut columns = Vec::with_capacity(df.width().saturating_sub(1));
    for column in df.get_columns() {
        let name = column.name().as_str();
        if name == DATE_COLUMN {
            continue;
        }
        let ca = column
            .f64()
            .map_err(|e| CacheReadError::Schema(format!("{name} column type: {e}")))?;
        let values: Vec<f64> = ca.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        columns.push((name.to_string(), values));
    }

    LabeledMatrix::from_columns(dates, columns)
        .map_err(|e| CacheReadError::Schema(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::returns::log_returns;

    fn sample_prices() -> PriceSeries {
        let dates = (0..5)
            .map(|i| NaiveDate::from_ymd_opt(2021, 1, 4).unwrap() + chrono::Duration::days(i))
            .collect();
        PriceSeries::from_columns(
            dates,
            vec![
                ("AAPL".into(), vec![129.4, 131.0, 126.6, 130.9, 132.1]),
                ("MSFT".into(), vec![217.7, 217.9, 212.3, 218.3, 219.6]),
            ],
        )
        .unwrap()
    }

    fn range() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2021, 6, 1).unwrap(),
        )
    }

    #[test]
    fn key_ignores_ticker_order_and_duplicates() {
        let (start, end) = range();
        let a = CacheKey::derive(&["AAPL", "MSFT"], start, end);
        let b = CacheKey::derive(&["MSFT", "AAPL", "MSFT"], start, end);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn key_depends_on_range() {
        let (start, end) = range();
        let a = CacheKey::derive(&["AAPL"], start, end);
        let b = CacheKey::derive(&["AAPL"], start, end + chrono::Duration::days(1));
        assert_ne!(a, b);
    }

    #[test]
    fn write_and_load_roundtrip_with_permuted_tickers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PipelineCache::new(dir.path());
        let (start, end) = range();
        let prices = sample_prices();
        let returns = log_returns(&prices);

        cache
            .save(&prices, &returns, &["AAPL", "MSFT"], start, end)
            .unwrap();
        let (p, r) = cache.load(&["MSFT", "AAPL"], start, end).unwrap();

        assert_eq!(p, prices);
        assert_eq!(r, returns);
    }

    #[test]
    fn missing_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PipelineCache::new(dir.path());
        let (start, end) = range();
        assert!(cache.load(&["AAPL"], start, end).is_none());
    }

    #[test]
    fn truncated_artifact_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PipelineCache::new(dir.path());
        let (start, end) = range();
        let prices = sample_prices();
        let returns = log_returns(&prices);
        cache
            .save(&prices, &returns, &["AAPL", "MSFT"], start, end)
            .unwrap();

        let key = CacheKey::derive(&["AAPL", "MSFT"], start, end);
        let path = dir.path().join("pipeline").join(key.as_str()).join(PRICES_FILE);
        fs::write(&path, b"PAR1 not really").unwrap();

        assert!(cache.load(&["AAPL", "MSFT"], start, end).is_none());
    }

    #[test]
    fn meta_sidecar_describes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PipelineCache::new(dir.path());
        let (start, end) = range();
        let prices = sample_prices();
        cache
            .save(&prices, &log_returns(&prices), &["MSFT", "AAPL"], start, end)
            .unwrap();

        let entries = cache.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tickers, vec!["AAPL", "MSFT"]);
        assert_eq!(entries[0].rows, 5);
        assert_eq!(entries[0].data_hash, content_hash(&prices));
    }

    fn msft_first_prices() -> PriceSeries {
        let prices = sample_prices();
        let (dates, _, values) = prices.clone().into_parts();
        PriceSeries::new(
            dates,
            vec!["MSFT".into(), "AAPL".into()],
            vec![values[1].clone(), values[0].clone()],
        )
        .unwrap()
    }

    #[test]
    fn unsorted_columns_roundtrip_in_saved_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PipelineCache::new(dir.path());
        let (start, end) = range();
        let prices = msft_first_prices();
        let returns = log_returns(&prices);

        cache
            .save(&prices, &returns, &["MSFT", "AAPL"], start, end)
            .unwrap();

        for tickers in [["MSFT", "AAPL"], ["AAPL", "MSFT"]] {
            let (p, r) = cache.load(&tickers, start, end).unwrap();
            assert_eq!(p, prices);
            assert_eq!(r, returns);
        }
    }

    #[test]
    fn save_rejects_columns_that_differ_from_tickers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PipelineCache::new(dir.path());
        let (start, end) = range();
        let prices = sample_prices();

        let err = cache
            .save(&prices, &log_returns(&prices), &["AAPL", "GOOG"], start, end)
            .unwrap_err();
        assert!(matches!(err, DataError::CacheError(_)));
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn concurrent_saves_leave_a_readable_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PipelineCache::new(dir.path());
        let (start, end) = range();
        let prices = sample_prices();
        let returns = log_returns(&prices);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    cache
                        .save(&prices, &returns, &["AAPL", "MSFT"], start, end)
                        .unwrap();
                });
            }
        });

        let (p, r) = cache.load(&["AAPL", "MSFT"], start, end).unwrap();
        assert_eq!(p, prices);
        assert_eq!(r, returns);

        // Only the three published files remain
        let key = CacheKey::derive(&["AAPL", "MSFT"], start, end);
        let files = fs::read_dir(dir.path().join("pipeline").join(key.as_str()))
            .unwrap()
            .count();
        assert_eq!(files, 3);
    }
}
