//! ATM implied-volatility extraction from a listed options chain.
//!
//! Steps, each with its own failure variant:
//! 1. Reject index symbols (`^GSPC` etc.) before touching the provider.
//! 2. Spot: primary quote, else the last of the recent daily closes.
//! 3. Nearest expiration's call chain; pick the ATM contract.
//! 4. Provider IV if usable; else invert Black-Scholes on the bid/ask mid,
//!    else on the last trade.

use super::black_scholes::{BlackScholes, InversionError, OptionKind};
use super::quote::{select_atm, PriceSource};
use crate::data::provider::{DataError, OptionsProvider};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Annualized risk-free rate used when none is configured.
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.045;

/// Sessions of daily closes requested when the primary spot quote is unusable.
pub const SPOT_HISTORY_DAYS: u32 = 5;

/// Expiries this many days out or closer are rejected for inversion.
pub const MIN_DAYS_TO_EXPIRY: i64 = 1;

#[derive(Debug, Error)]
pub enum IvFetchError {
    #[error("no options data for {symbol}: indices (e.g. ^GSPC) are not supported")]
    UnsupportedSymbol { symbol: String },

    #[error("no price data found for {symbol}; use a valid stock ticker (e.g. AAPL, MSFT)")]
    NoSpotPrice { symbol: String },

    #[error("no listed option expirations for {symbol}")]
    NoExpirations { symbol: String },

    #[error("no call options found for {symbol} expiring {expiry}")]
    EmptyChain { symbol: String, expiry: NaiveDate },

    #[error("option price unavailable for {symbol} ({expiry} ATM, strike {strike})")]
    NoUsablePrice {
        symbol: String,
        expiry: NaiveDate,
        strike: f64,
    },

    #[error("expiry too close for robust IV: {symbol} {expiry} ({days} day(s) out)")]
    ExpiryTooClose {
        symbol: String,
        expiry: NaiveDate,
        days: i64,
    },

    #[error("IV inversion failed for {symbol}: {source}")]
    Inversion {
        symbol: String,
        #[source]
        source: InversionError,
    },

    #[error("no fresh cached IV for {symbol}; run with refresh to fetch and cache")]
    NoFreshSnapshot { symbol: String },

    #[error("provider error for {symbol}: {source}")]
    Provider {
        symbol: String,
        #[source]
        source: DataError,
    },
}

/// Anything that can produce a point-in-time IV for a symbol.
pub trait IvSource: Send + Sync {
    fn implied_vol(&self, symbol: &str) -> Result<f64, IvFetchError>;
}

/// An IV estimate with the inputs that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvEstimate {
    pub symbol: String,
    pub iv: f64,
    pub spot: f64,
    pub strike: f64,
    pub expiry: NaiveDate,
    pub source: PriceSource,
}

/// Whether a symbol names an index rather than a tradable equity/ETF.
pub fn is_index_symbol(symbol: &str) -> bool {
    symbol.starts_with('^')
}

/// Computes ATM call IV from an [`OptionsProvider`].
pub struct IvExtractor<P> {
    provider: P,
    pricer: BlackScholes,
}

impl<P: OptionsProvider> IvExtractor<P> {
    pub fn new(provider: P, risk_free_rate: f64) -> Self {
        Self {
            provider,
            pricer: BlackScholes::new(risk_free_rate),
        }
    }

    pub fn risk_free_rate(&self) -> f64 {
        self.pricer.rate
    }

    /// ATM IV for `symbol` as of now.
    pub fn implied_vol(&self, symbol: &str) -> Result<f64, IvFetchError> {
        self.implied_vol_at(symbol, Utc::now())
    }

    pub fn implied_vol_at(&self, symbol: &str, now: DateTime<Utc>) -> Result<f64, IvFetchError> {
        self.estimate_at(symbol, now).map(|e| e.iv)
    }

    /// Full estimate for `symbol` as of `now`.
    pub fn estimate_at(&self, symbol: &str, now: DateTime<Utc>) -> Result<IvEstimate, IvFetchError> {
        if is_index_symbol(symbol) {
            return Err(IvFetchError::UnsupportedSymbol {
                symbol: symbol.to_string(),
            });
        }
        let provider_err = |source: DataError| IvFetchError::Provider {
            symbol: symbol.to_string(),
            source,
        };

        let spot = self.spot(symbol)?;

        let expiry = *self
            .provider
            .expirations(symbol)
            .map_err(provider_err)?
            .iter()
            .min()
            .ok_or_else(|| IvFetchError::NoExpirations {
                symbol: symbol.to_string(),
            })?;

        let chain = self
            .provider
            .call_chain(symbol, expiry)
            .map_err(provider_err)?;
        let atm = select_atm(&chain, spot).ok_or_else(|| IvFetchError::EmptyChain {
            symbol: symbol.to_string(),
            expiry,
        })?;

        let source = atm.price_source().ok_or_else(|| IvFetchError::NoUsablePrice {
            symbol: symbol.to_string(),
            expiry,
            strike: atm.strike,
        })?;
        let estimate = |iv: f64| IvEstimate {
            symbol: symbol.to_string(),
            iv,
            spot,
            strike: atm.strike,
            expiry,
            source,
        };

        let price = match source {
            PriceSource::ProviderIv(iv) => {
                tracing::debug!(symbol, strike = atm.strike, iv, "using provider IV");
                return Ok(estimate(iv));
            }
            PriceSource::Mid(p) | PriceSource::Last(p) => p,
        };

        let days = days_to_expiry(expiry, now);
        if days <= MIN_DAYS_TO_EXPIRY {
            return Err(IvFetchError::ExpiryTooClose {
                symbol: symbol.to_string(),
                expiry,
                days,
            });
        }
        let time = days as f64 / 365.0;

        let iv = self
            .pricer
            .implied_vol(price, spot, atm.strike, time, OptionKind::Call)
            .map_err(|source| IvFetchError::Inversion {
                symbol: symbol.to_string(),
                source,
            })?;

        tracing::debug!(symbol, spot, strike = atm.strike, %expiry, price, iv, "inverted ATM call");
        Ok(estimate(iv))
    }

    /// Primary quote, else the most recent usable daily close.
    fn spot(&self, symbol: &str) -> Result<f64, IvFetchError> {
        match self.provider.spot_price(symbol) {
            Ok(Some(s)) if s.is_finite() && s > 0.0 => return Ok(s),
            Ok(_) => {}
            Err(e) => tracing::debug!(symbol, error = %e, "primary spot quote failed"),
        }

        let closes = self
            .provider
            .recent_closes(symbol, SPOT_HISTORY_DAYS)
            .map_err(|source| IvFetchError::Provider {
                symbol: symbol.to_string(),
                source,
            })?;
        closes
            .iter()
            .rev()
            .copied()
            .find(|c| c.is_finite() && *c > 0.0)
            .ok_or_else(|| IvFetchError::NoSpotPrice {
                symbol: symbol.to_string(),
            })
    }
}

impl<P: OptionsProvider> IvSource for IvExtractor<P> {
    fn implied_vol(&self, symbol: &str) -> Result<f64, IvFetchError> {
        IvExtractor::implied_vol(self, symbol)
    }
}

/// Whole days from `now` until midnight UTC at the start of `expiry`.
pub fn days_to_expiry(expiry: NaiveDate, now: DateTime<Utc>) -> i64 {
    (expiry.and_time(NaiveTime::MIN).and_utc() - now).num_days()
}
