//! Coinbase Exchange REST client
//!
//! Products, tickers and 1-minute candles from the public market data API.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::RwLock;
use std::time::Duration;

use crate::oracle::sources::{http_client, ProviderAdapter};
use crate::types::{now_millis, CandlePrice, CurrencyPair, TickerPrice};

const COINBASE_REST_URL: &str = "https://api.exchange.coinbase.com";
const CANDLE_GRANULARITY_SECS: i64 = 60;
/// Newest buckets kept per product
const CANDLE_LIMIT: usize = 5;

#[derive(Debug, Deserialize)]
struct Product {
    base_currency: String,
    quote_currency: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    trading_disabled: bool,
}

#[derive(Debug, Deserialize)]
struct ProductTicker {
    price: String,
    volume: String,
}

#[derive(Debug)]
pub struct CoinbaseClient {
    http: reqwest::Client,
    base_url: String,
    subscriptions: RwLock<HashSet<CurrencyPair>>,
}

impl CoinbaseClient {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(request_timeout)?,
            base_url: COINBASE_REST_URL.to_string(),
            subscriptions: RwLock::new(HashSet::new()),
        })
    }

    /// Coinbase product id ("ATOM-USD")
    fn product_id(pair: &CurrencyPair) -> String {
        format!("{}-{}", pair.base, pair.quote)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {} from Coinbase", path))?;

        if !response.status().is_success() {
            bail!("Coinbase API returned error: {}", response.status());
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse Coinbase {} response", path))
    }

    async fn fetch_ticker(&self, pair: &CurrencyPair) -> Result<(String, TickerPrice)> {
        let id = Self::product_id(pair);
        let ticker: ProductTicker = self.get_json(&format!("products/{}/ticker", id)).await?;
        Ok((pair.key(), parse_ticker(&id, &ticker)?))
    }

    async fn fetch_candles(&self, pair: &CurrencyPair) -> Result<(String, Vec<CandlePrice>)> {
        let id = Self::product_id(pair);
        let buckets: Vec<Vec<f64>> = self
            .get_json(&format!(
                "products/{}/candles?granularity={}",
                id, CANDLE_GRANULARITY_SECS
            ))
            .await?;

        Ok((pair.key(), parse_candles(&buckets, now_millis())))
    }

    fn is_subscribed(&self, pair: &CurrencyPair) -> bool {
        self.subscriptions
            .read()
            .map(|s| s.contains(pair))
            .unwrap_or(false)
    }
}

#[async_trait]
impl ProviderAdapter for CoinbaseClient {
    fn name(&self) -> &str {
        "coinbase"
    }

    async fn available_pairs(&self) -> Result<HashSet<String>> {
        let products: Vec<Product> = self.get_json("products").await?;
        Ok(parse_products(products))
    }

    async fn subscribe(&self, pairs: &[CurrencyPair]) -> Result<()> {
        let mut subscriptions = self
            .subscriptions
            .write()
            .map_err(|_| anyhow::anyhow!("Coinbase subscription lock poisoned"))?;
        subscriptions.extend(pairs.iter().cloned());
        Ok(())
    }

    async fn ticker_prices(&self, pairs: &[CurrencyPair]) -> Result<HashMap<String, TickerPrice>> {
        for pair in pairs.iter().filter(|p| !self.is_subscribed(p)) {
            tracing::debug!(source = %"Coinbase", pair = %pair, "Polling pair that was never subscribed");
        }

        let tickers = try_join_all(pairs.iter().map(|pair| self.fetch_ticker(pair))).await?;
        Ok(tickers.into_iter().collect())
    }

    async fn candle_prices(
        &self,
        pairs: &[CurrencyPair],
    ) -> Result<HashMap<String, Vec<CandlePrice>>> {
        let results = try_join_all(pairs.iter().map(|pair| self.fetch_candles(pair))).await?;

        Ok(results
            .into_iter()
            .filter(|(_, candles)| !candles.is_empty())
            .collect())
    }
}

fn parse_products(products: Vec<Product>) -> HashSet<String> {
    products
        .into_iter()
        .filter(|p| !p.trading_disabled && (p.status.is_empty() || p.status == "online"))
        .map(|p| CurrencyPair::new(&p.base_currency, &p.quote_currency).key())
        .collect()
}

fn parse_ticker(product_id: &str, ticker: &ProductTicker) -> Result<TickerPrice> {
    Ok(TickerPrice {
        price: Decimal::from_str(&ticker.price)
            .with_context(|| format!("Invalid Coinbase price for {}", product_id))?,
        volume: Decimal::from_str(&ticker.volume)
            .with_context(|| format!("Invalid Coinbase volume for {}", product_id))?,
    })
}

/// Parse candle buckets: [[time, low, high, open, close, volume], ...], newest first
///
/// Returns the newest closed buckets, oldest first, stamped with their end time.
fn parse_candles(buckets: &[Vec<f64>], now_ms: i64) -> Vec<CandlePrice> {
    let mut candles: Vec<CandlePrice> = buckets
        .iter()
        .filter_map(|bucket| {
            if bucket.len() < 6 {
                return None;
            }

            let end_ms = (bucket[0] as i64 + CANDLE_GRANULARITY_SECS) * 1000;
            if end_ms > now_ms {
                return None;
            }

            Some(CandlePrice {
                price: Decimal::try_from(bucket[4]).ok()?,
                volume: Decimal::try_from(bucket[5]).ok()?,
                timestamp: end_ms,
            })
        })
        .collect();

    candles.sort_by_key(|c| c.timestamp);
    let skip = candles.len().saturating_sub(CANDLE_LIMIT);
    candles.split_off(skip)
}
