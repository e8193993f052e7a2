//! Core types used throughout PriceFeeder
//!
//! Defines currency pairs, ticker/candle samples and the per-tick aggregates
//! the oracle builds from provider data.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Name of a configured provider (e.g. "binance")
pub type ProviderName = String;

/// Latest ticker per provider per base symbol
///
/// e.g. `{"binance": {"ATOM": <price, volume>}}`
pub type AggregatedProviderPrices = HashMap<ProviderName, HashMap<String, TickerPrice>>;

/// Recent candles per provider per base symbol
pub type AggregatedProviderCandles = HashMap<ProviderName, HashMap<String, Vec<CandlePrice>>>;

/// Trading pair identified by its base and quote symbols
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: String,
    pub quote: String,
}

impl CurrencyPair {
    /// Build a pair, normalizing both symbols to uppercase
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            base: base.trim().to_uppercase(),
            quote: quote.trim().to_uppercase(),
        }
    }

    /// Identity key used by the available/subscribed sets ("ATOM/USDT")
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Ticker quote from a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerPrice {
    /// Last traded price
    pub price: Decimal,
    /// Traded volume in base currency (24h window on most exchanges)
    pub volume: Decimal,
}

/// One candle from a provider, reduced to what TVWAP needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandlePrice {
    /// Close price
    pub price: Decimal,
    /// Volume in base currency
    pub volume: Decimal,
    /// Candle end time in milliseconds
    pub timestamp: i64,
}

/// Which aggregation path produced a set of canonical prices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    /// Time-and-volume weighted average over candles
    Tvwap,
    /// Volume weighted average over tickers
    Vwap,
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceSource::Tvwap => write!(f, "TVWAP"),
            PriceSource::Vwap => write!(f, "VWAP"),
        }
    }
}

/// Current time in milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
