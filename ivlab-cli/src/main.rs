//! IVLab CLI: data pipeline, feature, implied-vol, and cache commands.
//!
//! Commands:
//! - `prices`: fetch, clean, validate, and cache prices; report realized vol
//! - `features`: build the feature matrix and scale train/val/test splits
//! - `iv`: ATM implied volatility per symbol, cache-first
//! - `benchmark`: S&P 500 benchmark summary and the 10-year risk-free rate
//! - `cache status`: list pipeline cache entries and IV snapshots

mod logging;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use ivlab_core::config::IvlabConfig;
use ivlab_core::data::returns::column_volatility;
use ivlab_core::data::{
    build_feature_matrix, iv_hv_ratio, scale_splits, CircuitBreaker, CsvPriceProvider,
    PipelineCache, PriceProvider, SplitBoundary, SyntheticProvider, WalkParams, YahooProvider,
};
use ivlab_core::options::{IvCache, IvExtractor, IvFetchError, IvSnapshot, IvSource};
use ivlab_core::pipeline::{fetch_benchmark, fetch_risk_free_rate, CleanData, Pipeline};
use ivlab_core::rng::RngHierarchy;
use logging::LogFormat;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "ivlab",
    about = "IVLab CLI: quant preprocessing pipeline and implied-volatility engine"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory (overrides the config file).
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ProviderKind {
    Yahoo,
    Csv,
    Synthetic,
}

/// Options shared by every command that runs the price pipeline.
#[derive(Args)]
struct DataArgs {
    /// Tickers (e.g., SPY QQQ AAPL). Defaults to the configured universe.
    tickers: Vec<String>,

    /// Start date (YYYY-MM-DD).
    #[arg(long)]
    start: Option<NaiveDate>,

    /// End date (YYYY-MM-DD).
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Where raw prices come from.
    #[arg(long, value_enum, default_value_t = ProviderKind::Yahoo)]
    provider: ProviderKind,

    /// Wide CSV file (required with --provider csv).
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Master seed for --provider synthetic (overrides the config file).
    #[arg(long)]
    seed: Option<u64>,

    /// Minimum trading days required by the validation gate.
    #[arg(long)]
    min_rows: Option<usize>,

    /// Bypass the pipeline cache for both reads and writes.
    #[arg(long, default_value_t = false)]
    no_cache: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, clean, validate, and cache prices; print a summary.
    Prices {
        #[command(flatten)]
        data: DataArgs,

        /// Print the summary as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Build features and scale train/val/test splits with train-only stats.
    Features {
        #[command(flatten)]
        data: DataArgs,

        /// Last date of the training partition.
        #[arg(long)]
        train_end: NaiveDate,

        /// Last date of the validation partition.
        #[arg(long)]
        val_end: NaiveDate,

        /// Rolling window for realized-vol features.
        #[arg(long)]
        window: Option<usize>,

        /// Write the fitted scaling stats as JSON to this path.
        #[arg(long)]
        stats_out: Option<PathBuf>,
    },
    /// ATM implied volatility, served from fresh snapshots when available.
    Iv {
        /// Symbols (e.g., AAPL MSFT NVDA). Defaults to the configured universe.
        symbols: Vec<String>,

        /// Fetch live when no fresh snapshot exists.
        #[arg(long, default_value_t = false)]
        refresh: bool,

        /// Maximum snapshot age in seconds.
        #[arg(long)]
        max_age_secs: Option<u64>,

        /// Risk-free rate for inversion (overrides the config file).
        #[arg(long)]
        rate: Option<f64>,
    },
    /// S&P 500 benchmark summary and the current 10-year Treasury yield.
    Benchmark {
        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List pipeline cache entries and IV snapshots.
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_format)?;

    let mut config = match &cli.config {
        Some(path) => IvlabConfig::from_file(path)?,
        None => IvlabConfig::default(),
    };
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }
    tracing::debug!(?config, "resolved config");

    match cli.command {
        Commands::Prices { data, json } => run_prices(&config, &data, json),
        Commands::Features {
            data,
            train_end,
            val_end,
            window,
            stats_out,
        } => run_features(&config, &data, train_end, val_end, window, stats_out.as_deref()),
        Commands::Iv {
            symbols,
            refresh,
            max_age_secs,
            rate,
        } => run_iv(&config, symbols, refresh, max_age_secs, rate),
        Commands::Benchmark { start, end } => run_benchmark(&config, start, end),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&config),
        },
    }
}

fn yahoo_provider() -> Result<YahooProvider> {
    let circuit_breaker = Arc::new(CircuitBreaker::default_provider());
    Ok(YahooProvider::new(circuit_breaker)?)
}

fn build_provider(config: &IvlabConfig, data: &DataArgs) -> Result<Box<dyn PriceProvider>> {
    Ok(match data.provider {
        ProviderKind::Yahoo => Box::new(yahoo_provider()?),
        ProviderKind::Csv => {
            let Some(path) = &data.csv else {
                bail!("--csv <path> is required with --provider csv");
            };
            Box::new(CsvPriceProvider::new(path))
        }
        ProviderKind::Synthetic => Box::new(SyntheticProvider::new(
            RngHierarchy::new(data.seed.unwrap_or(config.seed)),
            WalkParams::default(),
        )),
    })
}

fn resolve_range(
    config: &IvlabConfig,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> (NaiveDate, NaiveDate) {
    (
        start.unwrap_or(config.default_start),
        end.unwrap_or(config.default_end),
    )
}

fn load_clean_data(config: &IvlabConfig, data: &DataArgs) -> Result<CleanData> {
    let provider = build_provider(config, data)?;
    let tickers = if data.tickers.is_empty() {
        config.universe.clone()
    } else {
        data.tickers.clone()
    };
    let (start, end) = resolve_range(config, data.start, data.end);

    let cache = PipelineCache::new(&config.cache_dir);
    let mut pipeline =
        Pipeline::new(&*provider).with_min_rows(data.min_rows.unwrap_or(config.min_rows));
    if !data.no_cache {
        pipeline = pipeline.with_cache(&cache);
    }

    pipeline
        .get_clean_data(&tickers, start, end)
        .with_context(|| format!("preparing {} ticker(s) from {start} to {end}", tickers.len()))
}

fn run_prices(config: &IvlabConfig, data: &DataArgs, json: bool) -> Result<()> {
    let clean = load_clean_data(config, data)?;
    let vols = column_volatility(&clean.returns);
    let first = clean.prices.dates().first().copied();
    let last = clean.prices.dates().last().copied();

    if json {
        let summary = serde_json::json!({
            "tickers": clean.tickers,
            "source": clean.source,
            "rows": clean.prices.n_rows(),
            "start": first,
            "end": last,
            "annualized_vol": vols.iter().cloned().collect::<std::collections::BTreeMap<_, _>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!();
    println!("=== Clean Data ===");
    println!("Source:   {:?}", clean.source);
    println!("Tickers:  {}", clean.tickers.join(", "));
    println!("Rows:     {} prices, {} returns", clean.prices.n_rows(), clean.returns.n_rows());
    if let (Some(first), Some(last)) = (first, last) {
        println!("Period:   {first} to {last}");
    }
    println!();
    println!("{:<10} {:>12} {:>14}", "Ticker", "Last Close", "Ann. Vol");
    println!("{}", "-".repeat(38));
    for (name, vol) in &vols {
        let last_close = clean
            .prices
            .column(name)
            .and_then(|c| c.last().copied())
            .unwrap_or(f64::NAN);
        println!("{:<10} {:>12.2} {:>13.2}%", name, last_close, vol * 100.0);
    }
    println!();
    Ok(())
}

fn run_features(
    config: &IvlabConfig,
    data: &DataArgs,
    train_end: NaiveDate,
    val_end: NaiveDate,
    window: Option<usize>,
    stats_out: Option<&Path>,
) -> Result<()> {
    let boundary = SplitBoundary::new(train_end, val_end)?;
    let window = window.unwrap_or(config.feature_window);
    if window < 2 {
        bail!("--window must be at least 2");
    }

    let clean = load_clean_data(config, data)?;
    let features = build_feature_matrix(&clean.prices, Some(&clean.returns), window)?;
    let splits = scale_splits(&features.matrix, &boundary)?;

    println!();
    println!("=== Feature Splits ===");
    println!("Features: {}", features.matrix.columns().join(", "));
    println!("Boundary: train <= {train_end} < val <= {val_end} < test");
    println!();
    println!("{:<8} {:>8} {:>12} {:>12}", "Split", "Rows", "First", "Last");
    println!("{}", "-".repeat(44));
    for (label, split) in [("train", &splits.train), ("val", &splits.val), ("test", &splits.test)] {
        let dates = split.matrix.dates();
        let fmt_date = |d: Option<&NaiveDate>| d.map_or_else(|| "-".to_string(), |d| d.to_string());
        println!(
            "{:<8} {:>8} {:>12} {:>12}",
            label,
            dates.len(),
            fmt_date(dates.first()),
            fmt_date(dates.last())
        );
    }
    println!();

    if let Some(path) = stats_out {
        let json = serde_json::to_string_pretty(&splits.stats)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write scaling stats to {}", path.display()))?;
        println!("Scaling stats saved to: {}", path.display());
    }
    Ok(())
}

fn run_iv(
    config: &IvlabConfig,
    symbols: Vec<String>,
    refresh: bool,
    max_age_secs: Option<u64>,
    rate: Option<f64>,
) -> Result<()> {
    let symbols = if symbols.is_empty() {
        config.universe.clone()
    } else {
        symbols
    };
    let max_age = max_age_secs.map_or_else(|| config.iv_max_age(), Duration::from_secs);
    let rate = rate.unwrap_or(config.risk_free_rate);

    let extractor = IvExtractor::new(yahoo_provider()?, rate);
    let cache = IvCache::new(config.iv_cache_dir(), extractor);

    let results: Vec<(String, Result<f64, IvFetchError>)> = symbols
        .par_iter()
        .map(|symbol| (symbol.clone(), cache.get(symbol, max_age, refresh)))
        .collect();

    println!();
    println!("{:<10} {:>10}", "Symbol", "ATM IV");
    println!("{}", "-".repeat(21));
    let mut failures = Vec::new();
    for (symbol, result) in results {
        match result {
            Ok(iv) => println!("{:<10} {:>9.2}%", symbol, iv * 100.0),
            Err(e) => {
                println!("{:<10} {:>10}", symbol, "n/a");
                failures.push((symbol, e));
            }
        }
    }
    println!();

    if !failures.is_empty() {
        for (symbol, err) in &failures {
            eprintln!("Error for {symbol}: {err}");
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run_benchmark(config: &IvlabConfig, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<()> {
    let (start, end) = resolve_range(config, start, end);
    let provider = yahoo_provider()?;

    let benchmark = fetch_benchmark(&provider, start, end)?;
    let returns = ivlab_core::data::log_returns(&benchmark);
    let hv = column_volatility(&returns)
        .first()
        .map(|(_, v)| *v)
        .unwrap_or(f64::NAN);
    let rate = fetch_risk_free_rate(&provider, chrono::Local::now().date_naive())?;

    println!();
    println!("=== Benchmark ===");
    println!("Rows:           {}", benchmark.n_rows());
    if let (Some(first), Some(last)) = (benchmark.dates().first(), benchmark.dates().last()) {
        println!("Period:         {first} to {last}");
    }
    println!("Ann. Vol (HV):  {:.2}%", hv * 100.0);
    println!("Risk-free (10y): {:.3}%", rate * 100.0);

    // IVR against the last SPY snapshot on disk
    if let Some(snapshot) = offline_iv_cache(&config.iv_cache_dir()).read_snapshot("SPY") {
        if let Some(ivr) = iv_hv_ratio(snapshot.iv, hv) {
            println!("SPY IV/HV:      {ivr:.2}");
        }
    }
    println!();
    Ok(())
}

fn run_cache_status(config: &IvlabConfig) -> Result<()> {
    let cache_dir = &config.cache_dir;
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }

    let entries = PipelineCache::new(cache_dir).entries();
    println!("Cache: {}", cache_dir.display());
    println!("Pipeline entries: {}", entries.len());
    if !entries.is_empty() {
        println!();
        println!(
            "{:<18} {:<25} {:>6} {:<20} {:>10}",
            "Key", "Date Range", "Rows", "Cached At", "Size"
        );
        println!("{}", "-".repeat(83));
        for meta in &entries {
            let size = dir_size(&cache_dir.join("pipeline").join(meta.key.as_str()));
            println!(
                "{:<18} {:<25} {:>6} {:<20} {:>10}",
                meta.key.as_str(),
                format!("{} to {}", meta.start, meta.end),
                meta.rows,
                meta.cached_at.format("%Y-%m-%d %H:%M:%S"),
                format_size(size)
            );
            println!("  tickers: {}", meta.tickers.join(", "));
        }
    }

    let snapshots = read_iv_snapshots(&config.iv_cache_dir());
    println!();
    println!("IV snapshots: {}", snapshots.len());
    if !snapshots.is_empty() {
        let now = chrono::Utc::now().timestamp();
        println!();
        println!("{:<10} {:>10} {:>12} {:>7}", "Symbol", "IV", "Age", "Fresh");
        println!("{}", "-".repeat(42));
        for snap in &snapshots {
            println!(
                "{:<10} {:>9.2}% {:>12} {:>7}",
                snap.symbol,
                snap.iv * 100.0,
                format_age(now - snap.fetched_at),
                if snap.is_fresh(now, config.iv_max_age()) { "yes" } else { "no" }
            );
        }
    }
    Ok(())
}

/// Never fetches; snapshot reads only.
struct Offline;

impl IvSource for Offline {
    fn implied_vol(&self, symbol: &str) -> Result<f64, IvFetchError> {
        Err(IvFetchError::NoFreshSnapshot {
            symbol: symbol.to_string(),
        })
    }
}

fn offline_iv_cache(dir: &Path) -> IvCache<Offline> {
    IvCache::new(dir, Offline)
}

fn read_iv_snapshots(dir: &Path) -> Vec<IvSnapshot> {
    offline_iv_cache(dir).snapshots()
}

fn dir_size(path: &Path) -> u64 {
    let mut size = 0u64;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            if let Ok(meta) = entry.metadata() {
                size += meta.len();
            }
        }
    }
    size
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn format_age(secs: i64) -> String {
    match secs {
        s if s < 0 => "future".to_string(),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_features_command() {
        let cli = Cli::try_parse_from([
            "ivlab",
            "--log-format",
            "json",
            "features",
            "SPY",
            "TLT",
            "--train-end",
            "2022-12-30",
            "--val-end",
            "2023-06-30",
            "--provider",
            "synthetic",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Commands::Features { data, train_end, .. } => {
                assert_eq!(data.tickers, ["SPY", "TLT"]);
                assert_eq!(data.provider, ProviderKind::Synthetic);
                assert_eq!(train_end, NaiveDate::from_ymd_opt(2022, 12, 30).unwrap());
            }
            _ => panic!("expected features command"),
        }
    }

    #[test]
    fn rejects_malformed_dates() {
        assert!(Cli::try_parse_from(["ivlab", "prices", "--start", "01/02/2024"]).is_err());
    }

    #[test]
    fn formats_sizes_and_ages() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_age(7200), "2h");
        assert_eq!(format_age(3 * 86_400), "3d");
    }
}
