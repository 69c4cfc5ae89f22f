//! Freshness-gated on-disk IV snapshots.
//!
//! One JSON file per symbol: `{cache_dir}/iv_snapshot_{sanitized}.json`.
//! A missing, malformed or stale snapshot is never an error on its own; it
//! only matters when the caller forbids a refresh.

use super::extractor::{IvFetchError, IvSource};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default snapshot lifetime: one day.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60 * 24);

/// A persisted point-in-time IV value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvSnapshot {
    pub symbol: String,
    pub iv: f64,
    /// Unix seconds. Absent in a file means the epoch, i.e. always stale.
    #[serde(default)]
    pub fetched_at: i64,
}

impl IvSnapshot {
    /// Fresh when at most `max_age` old and holding a finite value.
    pub fn is_fresh(&self, now: i64, max_age: Duration) -> bool {
        let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        self.iv.is_finite() && now.saturating_sub(self.fetched_at) <= max_age
    }
}

/// Replace each run of characters outside `[A-Za-z0-9_.-]` with one `_`.
pub fn sanitize_symbol(symbol: &str) -> String {
    let mut out = String::with_capacity(symbol.len());
    let mut in_run = false;
    for c in symbol.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Cache-first IV lookup in front of an [`IvSource`].
pub struct IvCache<S> {
    cache_dir: PathBuf,
    source: S,
}

impl<S: IvSource> IvCache<S> {
    pub fn new(cache_dir: impl Into<PathBuf>, source: S) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            source,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn snapshot_path(&self, symbol: &str) -> PathBuf {
        self.cache_dir
            .join(format!("iv_snapshot_{}.json", sanitize_symbol(symbol)))
    }

    /// Cached IV if fresh; otherwise a live fetch when `refresh` is set.
    pub fn get(&self, symbol: &str, max_age: Duration, refresh: bool) -> Result<f64, IvFetchError> {
        self.get_at(symbol, max_age, refresh, unix_now())
    }

    /// [`get`](Self::get) with an explicit clock in unix seconds.
    pub fn get_at(
        &self,
        symbol: &str,
        max_age: Duration,
        refresh: bool,
        now: i64,
    ) -> Result<f64, IvFetchError> {
        if let Some(snapshot) = self.read_snapshot(symbol) {
            if snapshot.is_fresh(now, max_age) {
                tracing::debug!(symbol, iv = snapshot.iv, age_secs = now - snapshot.fetched_at, "IV cache hit");
                return Ok(snapshot.iv);
            }
        }

        if !refresh {
            return Err(IvFetchError::NoFreshSnapshot {
                symbol: symbol.to_string(),
            });
        }

        let iv = self.source.implied_vol(symbol)?;
        let snapshot = IvSnapshot {
            symbol: symbol.to_string(),
            iv,
            fetched_at: now,
        };
        if let Err(e) = self.write_snapshot(&snapshot) {
            tracing::warn!(symbol, error = %e, "failed to persist IV snapshot");
        }
        Ok(iv)
    }

    /// Snapshot on disk for `symbol`. Unreadable or malformed files are `None`.
    ///
    /// Distinct symbols can sanitize to the same file name; a snapshot whose
    /// stored symbol differs belongs to the other one and is also `None`.
    pub fn read_snapshot(&self, symbol: &str) -> Option<IvSnapshot> {
        let snapshot = read_snapshot_file(&self.snapshot_path(symbol))?;
        if snapshot.symbol != symbol {
            tracing::debug!(symbol, stored = %snapshot.symbol, "IV snapshot belongs to another symbol");
            return None;
        }
        Some(snapshot)
    }

    /// Every readable snapshot in the cache directory, sorted by symbol.
    pub fn snapshots(&self) -> Vec<IvSnapshot> {
        let Ok(entries) = fs::read_dir(&self.cache_dir) else {
            return Vec::new();
        };
        let mut out: Vec<IvSnapshot> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("iv_snapshot_") && n.ends_with(".json"))
            })
            .filter_map(|p| read_snapshot_file(&p))
            .collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }

    fn write_snapshot(&self, snapshot: &IvSnapshot) -> io::Result<()> {
        fs::create_dir_all(&self.cache_dir)?;
        let path = self.snapshot_path(&snapshot.symbol);
        let json = serde_json::to_string_pretty(snapshot).map_err(io::Error::other)?;
        // Unique temp name per write, so concurrent refreshes never interleave
        let mut tmp = tempfile::NamedTempFile::new_in(&self.cache_dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }
}

fn read_snapshot_file(path: &Path) -> Option<IvSnapshot> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed IV snapshot");
            None
        }
    }
}
