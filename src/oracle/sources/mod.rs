//! Provider adapters (Binance, Coinbase)
//!
//! The oracle only talks to the [`ProviderAdapter`] trait; each exchange is a
//! separate implementation built by [`new_provider`] from its configured name.

mod binance;
mod coinbase;

pub use binance::BinanceClient;
pub use coinbase::CoinbaseClient;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::error::OracleError;
use crate::types::{CandlePrice, CurrencyPair, TickerPrice};

/// Trait for market-data providers
///
/// Result maps are keyed by the pair identity (`CurrencyPair::key`, e.g.
/// "ATOM/USDT"). Pairs the provider has no data for are simply absent.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Pairs currently listed by the provider
    async fn available_pairs(&self) -> Result<HashSet<String>>;

    /// Start tracking the given pairs (batched, idempotent)
    async fn subscribe(&self, pairs: &[CurrencyPair]) -> Result<()>;

    /// Latest ticker for each pair
    async fn ticker_prices(&self, pairs: &[CurrencyPair]) -> Result<HashMap<String, TickerPrice>>;

    /// Recent closed candles for each pair, oldest first
    async fn candle_prices(
        &self,
        pairs: &[CurrencyPair],
    ) -> Result<HashMap<String, Vec<CandlePrice>>>;
}

/// Build the adapter for a configured provider name
pub fn new_provider(
    name: &str,
    request_timeout: Duration,
) -> Result<Arc<dyn ProviderAdapter>, OracleError> {
    let init_err = |source: anyhow::Error| OracleError::ProviderInit {
        provider: name.to_string(),
        source,
    };

    match name.trim().to_lowercase().as_str() {
        "binance" => Ok(Arc::new(BinanceClient::new(request_timeout).map_err(init_err)?)),
        "coinbase" => Ok(Arc::new(CoinbaseClient::new(request_timeout).map_err(init_err)?)),
        _ => Err(OracleError::UnknownProvider(name.to_string())),
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("pricefeeder/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_provider_by_name() {
        let timeout = Duration::from_secs(5);
        assert_eq!(new_provider("binance", timeout).unwrap().name(), "binance");
        assert_eq!(new_provider(" Coinbase ", timeout).unwrap().name(), "coinbase");
    }

    #[test]
    fn test_new_provider_unknown() {
        let err = new_provider("mexc", Duration::from_secs(5)).err().unwrap();
        assert!(matches!(err, OracleError::UnknownProvider(name) if name == "mexc"));
    }
}
