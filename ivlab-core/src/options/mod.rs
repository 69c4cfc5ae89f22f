//! Implied-volatility engine: quotes, Black-Scholes inversion, extraction
//! from a live chain, and the freshness-gated snapshot cache.

pub mod black_scholes;
pub mod extractor;
pub mod iv_cache;
pub mod quote;

pub use black_scholes::{implied_volatility, BlackScholes, InversionError, OptionKind};
pub use extractor::{IvEstimate, IvExtractor, IvFetchError, IvSource, DEFAULT_RISK_FREE_RATE};
pub use iv_cache::{IvCache, IvSnapshot};
pub use quote::{select_atm, OptionQuote, PriceSource};
