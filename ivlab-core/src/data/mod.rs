//! Data ingestion, cleaning, feature preparation, and caching

pub mod align;
pub mod cache;
pub mod circuit_breaker;
pub mod clean;
pub mod csv_import;
pub mod features;
pub mod frame;
pub mod provider;
pub mod returns;
pub mod synthetic;
pub mod yahoo;

pub use align::{union_align, DailyClose};
pub use cache::{normalize_tickers, CacheKey, CacheMeta, PipelineCache};
pub use circuit_breaker::CircuitBreaker;
pub use clean::{clean, validate, DataValidationError, ValidationRules, Violation, DEFAULT_MIN_ROWS};
pub use csv_import::CsvPriceProvider;
pub use features::{
    build_feature_matrix, scale_splits, standardize, temporal_split, FeatureError, FeatureMatrix,
    ScaledSplits, ScalingStats, SplitBoundary,
};
pub use frame::{FrameError, LabeledMatrix, PriceSeries, ReturnSeries};
pub use provider::{DataError, DataSource, OptionsProvider, PriceProvider};
pub use returns::{annualize_return, annualize_vol, iv_hv_ratio, log_returns, realized_vol};
pub use synthetic::{SyntheticProvider, WalkParams};
pub use yahoo::YahooProvider;
