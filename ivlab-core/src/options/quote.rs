//! Option contract quotes, ATM selection, and price-source resolution.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One listed contract as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub strike: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last_price: Option<f64>,
    /// Provider-computed implied volatility, annualized decimal.
    pub provider_iv: Option<f64>,
    pub expiry: NaiveDate,
}

/// Which input the IV estimate is derived from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PriceSource {
    /// Provider IV, used directly with no inversion.
    ProviderIv(f64),
    /// Bid/ask midpoint.
    Mid(f64),
    /// Last traded price.
    Last(f64),
}

/// `Some(v)` when `v` is finite and strictly positive.
fn usable(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite() && *x > 0.0)
}

impl OptionQuote {
    /// First usable source: provider IV, then bid/ask mid, then last trade.
    pub fn price_source(&self) -> Option<PriceSource> {
        if let Some(iv) = usable(self.provider_iv) {
            return Some(PriceSource::ProviderIv(iv));
        }
        if let (Some(bid), Some(ask)) = (usable(self.bid), usable(self.ask)) {
            return Some(PriceSource::Mid((bid + ask) / 2.0));
        }
        usable(self.last_price).map(PriceSource::Last)
    }
}

/// The contract whose strike is closest to `spot`.
///
/// Equidistant strikes resolve to the lower strike, so the choice does not
/// depend on the order the provider lists contracts in. Contracts with a
/// non-finite strike are skipped.
pub fn select_atm(chain: &[OptionQuote], spot: f64) -> Option<&OptionQuote> {
    let mut best: Option<(&OptionQuote, f64)> = None;
    for quote in chain.iter().filter(|q| q.strike.is_finite()) {
        let distance = (quote.strike - spot).abs();
        let better = match best {
            None => true,
            Some((current, best_distance)) => {
                distance < best_distance
                    || (distance == best_distance && quote.strike < current.strike)
            }
        };
        if better {
            best = Some((quote, distance));
        }
    }
    best.map(|(q, _)| q)
}
