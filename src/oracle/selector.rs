//! Price selector - picks canonical prices for a tick
//!
//! Candles are preferred: if the filtered candles yield any TVWAP, those
//! prices are used as-is and tickers are not looked at. Otherwise the
//! filtered tickers are reduced with VWAP.

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

use crate::error::OracleError;
use crate::oracle::filter::{DeviationFilter, Rejection};
use crate::oracle::stats::{compute_tvwap, compute_vwap};
use crate::types::{AggregatedProviderCandles, AggregatedProviderPrices, PriceSource};

/// Canonical prices chosen for one tick
#[derive(Debug, Clone)]
pub struct PriceSelection {
    pub prices: HashMap<String, Decimal>,
    pub source: PriceSource,
    /// Samples dropped by the deviation filter on the way
    pub rejected: Vec<Rejection>,
}

impl PriceSelection {
    /// Bases in `expected` that ended up without a price
    pub fn missing<'a>(&self, expected: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        let mut missing: Vec<String> = expected
            .into_iter()
            .filter(|base| !self.prices.contains_key(*base))
            .cloned()
            .collect();
        missing.sort();
        missing
    }
}

pub struct PriceSelector {
    filter: DeviationFilter,
}

impl PriceSelector {
    pub fn new(filter: DeviationFilter) -> Self {
        Self { filter }
    }

    /// Select prices from this tick's aggregates
    pub fn select(
        &self,
        tickers: &AggregatedProviderPrices,
        candles: &AggregatedProviderCandles,
        now_ms: i64,
    ) -> Result<PriceSelection, OracleError> {
        let filtered_candles = self.filter.filter_candles(candles, now_ms)?;
        let tvwap_prices = compute_tvwap(&filtered_candles.kept, now_ms)?;

        if !tvwap_prices.is_empty() {
            log_unreported(&tvwap_prices, candles, "candles");
            return Ok(PriceSelection {
                prices: tvwap_prices,
                source: PriceSource::Tvwap,
                rejected: filtered_candles.rejected,
            });
        }

        // Candles missing or stale, fall back to the most recent tickers
        let filtered_tickers = self.filter.filter_tickers(tickers)?;
        let vwap_prices = compute_vwap(&filtered_tickers.kept)?;

        if vwap_prices.is_empty() {
            return Err(OracleError::NoPrices);
        }

        log_unreported(&vwap_prices, tickers, "prices");

        let mut rejected = filtered_candles.rejected;
        rejected.extend(filtered_tickers.rejected);

        Ok(PriceSelection {
            prices: vwap_prices,
            source: PriceSource::Vwap,
            rejected,
        })
    }
}

/// Warn about bases some provider reported that did not make it into the
/// final prices. Observational only.
fn log_unreported<T>(
    prices: &HashMap<String, Decimal>,
    reported: &HashMap<String, HashMap<String, T>>,
    kind: &str,
) {
    let reported_bases: HashSet<&String> = reported.values().flat_map(|m| m.keys()).collect();
    for base in reported_bases {
        if !prices.contains_key(base) {
            tracing::debug!(base = %base, "missing {} for asset after filtering", kind);
        }
    }
}
